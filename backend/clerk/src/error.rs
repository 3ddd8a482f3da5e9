use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClerkError {
    #[error("Token generation exhausted after {attempts} attempts")]
    GenerationExhausted { attempts: usize },

    #[error("Key function returned {actual} characters, expected {expected}")]
    KeyLength { expected: usize, actual: usize },
}
