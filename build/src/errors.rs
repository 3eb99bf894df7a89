use std::fmt::Display;

#[derive(Debug, Clone)]
pub struct BuildError(pub Option<String>);

impl BuildError {
    pub fn msg(msg: impl Into<String>) -> Self {
        Self(Some(msg.into()))
    }
}

impl std::error::Error for BuildError {}

impl Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(msg) => write!(f, "{msg}"),
            None => write!(f, "build failed"),
        }
    }
}

impl From<std::io::Error> for BuildError {
    fn from(value: std::io::Error) -> Self {
        Self(Some(value.to_string()))
    }
}
