use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

const MAX_TOKEN_LEN: usize = 128;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Instance token must not be empty")]
    Empty,
    #[error("Instance token is longer than {0} characters")]
    TooLong(usize),
    #[error("Instance token contains unsupported character {0:?}")]
    InvalidCharacter(char),
}

/// Identifies one pipeline instance to the result-collection service.
///
/// The token travels in a URL path, so only `[A-Za-z0-9._-]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Result<Self, TokenError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TokenError::Empty);
        }
        if value.len() > MAX_TOKEN_LEN {
            return Err(TokenError::TooLong(MAX_TOKEN_LEN));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(TokenError::InvalidCharacter(c));
        }
        Ok(Self(value))
    }

    /// Derives a token from the process id and start time.
    pub fn from_process() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(format!("pid-{}-{}", std::process::id(), millis))
    }

    pub fn resolve(configured: Option<&str>) -> Result<Self, TokenError> {
        match configured {
            Some(value) => Self::new(value),
            None => Ok(Self::from_process()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_token_kept() {
        let token = Token::resolve(Some("camera-7.east_wing")).unwrap();
        assert_eq!(token.as_str(), "camera-7.east_wing");
    }

    #[test]
    fn test_derived_token_names_process() {
        let token = Token::resolve(None).unwrap();
        let prefix = format!("pid-{}-", std::process::id());
        assert!(token.as_str().starts_with(&prefix));
        assert!(Token::new(token.as_str()).is_ok());
    }

    #[test]
    fn test_invalid_tokens_rejected() {
        assert_eq!(Token::new(""), Err(TokenError::Empty));
        assert_eq!(Token::new("a/b"), Err(TokenError::InvalidCharacter('/')));
        assert_eq!(
            Token::new("x".repeat(129)),
            Err(TokenError::TooLong(MAX_TOKEN_LEN))
        );
    }
}
