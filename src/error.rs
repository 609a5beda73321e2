use std::{fmt, io, sync::Arc};

/// Result returning Error
pub type Result<T> = std::result::Result<T, Error>;

/// `Error` is the crate-wide error type. It covers the failure classes of
/// the tree engine: bad configuration, page store failures, and structural
/// corruption discovered while reading pages.
#[derive(Clone, Debug)]
pub enum Error {
	InvalidOrder(usize), // Tree constructed with an order below the minimum
	Io(Arc<io::Error>),  // A page store reported an I/O failure
	Exhausted,           // The page store cannot hand out another page id
	Corruption(String),  // A page violated a structural invariant
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::InvalidOrder(order) => {
				write!(f, "Invalid tree order {order} (minimum is 2)")
			}
			Error::Io(err) => write!(f, "IO error: {err}"),
			Error::Exhausted => write!(f, "Page store exhausted"),
			Error::Corruption(msg) => write!(f, "Corruption detected: {msg}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(Arc::new(e))
	}
}
