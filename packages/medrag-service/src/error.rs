use medrag_domain::guardrail::{GuardrailBlocked, GuardrailResult};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Guardrail blocked the request: {}", .result.message)]
	GuardrailBlocked { result: Box<GuardrailResult> },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Invalid configuration: {message}")]
	Config { message: String },
}
impl Error {
	/// Stable machine-readable code used in API error bodies and trace error info.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "INVALID_REQUEST",
			Self::GuardrailBlocked { .. } => "GUARDRAIL_BLOCKED",
			Self::Provider { .. } => "PROVIDER_ERROR",
			Self::Storage { .. } => "STORAGE_ERROR",
			Self::Config { .. } => "CONFIG_ERROR",
		}
	}
}

impl From<color_eyre::Report> for Error {
	fn from(err: color_eyre::Report) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<medrag_storage::Error> for Error {
	fn from(err: medrag_storage::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<GuardrailBlocked> for Error {
	fn from(blocked: GuardrailBlocked) -> Self {
		Self::GuardrailBlocked { result: Box::new(blocked.result) }
	}
}
