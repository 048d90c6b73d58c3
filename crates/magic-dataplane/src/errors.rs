use thiserror::Error;

use crate::executor::ExecError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataplaneError {
    #[error("kernel command failed: {0}")]
    Exec(#[from] ExecError),
    #[error("link table capacity exceeded: at most {max} links supported")]
    TooManyLinks { max: usize },
    #[error("client rule capacity exceeded: at most {max} client rules supported")]
    TooManyClientRules { max: usize },
    #[error("TFT rule capacity exceeded: at most {max} TFT rules supported")]
    TooManyTftRules { max: usize },
    #[error("link {0} is not registered in the dataplane")]
    UnknownLink(String),
    #[error("TFT rule handle {0} is not installed")]
    UnknownTftRule(String),
}
