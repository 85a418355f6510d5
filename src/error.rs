//! Error taxonomy. Every failure carries a kind and a human message.

/// Wallet core result type.
pub type Result<T, E = WalletError> = std::result::Result<T, E>;

/// Errors surfaced by the wallet core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Wallet not initialized")]
    NotInitialized,
    #[error("Wallet database is bound to different descriptors: {0}")]
    StateConflict(String),
    #[error("A sync is already running for this wallet")]
    SyncInProgress,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Transaction rejected by server: {0}")]
    Rejected(String),
    #[error("Invalid builder state: {0}")]
    InvalidBuilderState(String),
    #[error("Invalid fee rate: {0}")]
    InvalidFeeRate(String),
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Output of {amount} sat is below the dust limit of {limit} sat")]
    OutputBelowDust { amount: u64, limit: u64 },
    #[error("Insufficient funds: {needed} sat needed, {available} sat available")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("Transaction not found or not eligible: {0}")]
    TransactionNotFound(String),
    #[error("Transaction {0} does not signal replaceability")]
    NotReplaceable(String),
    #[error("Unknown UTXO: {0}")]
    UnknownUtxo(String),
    #[error("Incomplete PSBT: {0}")]
    IncompletePsbt(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Stable, matchable classification of a [`WalletError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Entropy,
    InvalidMnemonic,
    InvalidDescriptor,
    NotInitialized,
    StateConflict,
    SyncInProgress,
    Network,
    Rejected,
    InvalidBuilderState,
    InvalidFeeRate,
    InvalidAddress,
    OutputBelowDust,
    InsufficientFunds,
    TransactionNotFound,
    NotReplaceable,
    UnknownUtxo,
    IncompletePsbt,
    Signature,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Entropy => "entropy",
            ErrorKind::InvalidMnemonic => "invalid_mnemonic",
            ErrorKind::InvalidDescriptor => "invalid_descriptor",
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::SyncInProgress => "sync_in_progress",
            ErrorKind::Network => "network",
            ErrorKind::Rejected => "rejected",
            ErrorKind::InvalidBuilderState => "invalid_builder_state",
            ErrorKind::InvalidFeeRate => "invalid_fee_rate",
            ErrorKind::InvalidAddress => "invalid_address",
            ErrorKind::OutputBelowDust => "output_below_dust",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::TransactionNotFound => "transaction_not_found",
            ErrorKind::NotReplaceable => "not_replaceable",
            ErrorKind::UnknownUtxo => "unknown_utxo",
            ErrorKind::IncompletePsbt => "incomplete_psbt",
            ErrorKind::Signature => "signature",
            ErrorKind::Storage => "storage",
        }
    }
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::Entropy(_) => ErrorKind::Entropy,
            WalletError::InvalidMnemonic(_) => ErrorKind::InvalidMnemonic,
            WalletError::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            WalletError::NotInitialized => ErrorKind::NotInitialized,
            WalletError::StateConflict(_) => ErrorKind::StateConflict,
            WalletError::SyncInProgress => ErrorKind::SyncInProgress,
            WalletError::Network(_) => ErrorKind::Network,
            WalletError::Rejected(_) => ErrorKind::Rejected,
            WalletError::InvalidBuilderState(_) => ErrorKind::InvalidBuilderState,
            WalletError::InvalidFeeRate(_) => ErrorKind::InvalidFeeRate,
            WalletError::InvalidAddress { .. } => ErrorKind::InvalidAddress,
            WalletError::OutputBelowDust { .. } => ErrorKind::OutputBelowDust,
            WalletError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            WalletError::TransactionNotFound(_) => ErrorKind::TransactionNotFound,
            WalletError::NotReplaceable(_) => ErrorKind::NotReplaceable,
            WalletError::UnknownUtxo(_) => ErrorKind::UnknownUtxo,
            WalletError::IncompletePsbt(_) => ErrorKind::IncompletePsbt,
            WalletError::Signature(_) => ErrorKind::Signature,
            WalletError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        WalletError::Storage(format!("{context}: {err}"))
    }
}
