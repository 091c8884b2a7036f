use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the error taxonomy of the package loader:
///
/// ## Fatal errors
/// These abort the whole load transaction. The package (or chunk, or name table) they refer
/// to cannot be trusted anymore.
/// - [`Error::Malformed`] - Corrupted package structure (bad magic, broken Outer chain, invalid name index)
/// - [`Error::OutOfBounds`] - Attempted to read beyond the available data
/// - [`Error::NotSupported`] - Unsupported file version or compression method
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Decompression`] - A compressed chunk could not be inflated
/// - [`Error::RecursionLimit`] - Maximum recursion depth exceeded
/// - [`Error::LoadTransaction`] - Unbalanced `begin_load` / `end_load` usage
///
/// ## Recoverable errors
/// These fail a single request (one object, one import, one resource) while the rest of the
/// session keeps working.
/// - [`Error::ExportDead`] - The class of an export could not be resolved
/// - [`Error::ImportNotFound`] - An import has no matching export in its package
/// - [`Error::PackageNotFound`] - A referenced package could not be located
/// - [`Error::ClassNotFound`] - A class name is not registered
/// - [`Error::ClassRegistration`] - A class definition was rejected by the registry
/// - [`Error::ResourceNotFound`] - A named resource entry does not exist
///
/// Skippable problems inside a tagged property stream (renamed fields, type mismatches,
/// struct layout drift) never surface as errors; they are reported through
/// [`crate::Diagnostics`] instead.
///
/// # Examples
///
/// ```rust,no_run
/// use pkgscope::{Error, LoadSession, LoadConfig};
/// use std::path::Path;
///
/// let mut session = LoadSession::new(LoadConfig::default());
/// match session.open_package(Path::new("Widgets.pkg")) {
///     Ok(linker) => println!("Opened {:?}", linker),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed package: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The package is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the data.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This package version or feature is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// A compressed chunk could not be inflated or deflated.
    #[error("Decompression failed - {0}")]
    Decompression(String),

    /// Recursion limit reached.
    ///
    /// Guards walks over Outer chains and nested structs. The associated value shows the
    /// limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// `end_load` was called without a matching `begin_load`.
    #[error("Load transaction error - {0}")]
    LoadTransaction(String),

    /// The export could not be constructed because its class is unknown.
    ///
    /// The export is marked dead for the remainder of the session; sibling exports in the
    /// same package are unaffected.
    #[error("Export {index} ({name}) of package {package} is dead")]
    ExportDead {
        /// Name of the owning package
        package: String,
        /// Zero based export table position
        index: u32,
        /// Display name of the export
        name: String,
    },

    /// An import did not match any export of its package.
    #[error("Import {path} (class {class}) could not be found")]
    ImportNotFound {
        /// Full object path of the import
        path: String,
        /// Class name the import expects
        class: String,
    },

    /// A package referenced by name could not be located.
    #[error("Package {0} could not be found")]
    PackageNotFound(String),

    /// A class name is not registered in the class registry.
    #[error("Class {0} is not registered")]
    ClassNotFound(String),

    /// Failed to register a class or struct definition.
    #[error("Failed to register class - {0}")]
    ClassRegistration(String),

    /// The named resource entry does not exist.
    #[error("Resource {namespace}:{name} not found")]
    ResourceNotFound {
        /// Namespace of the lookup
        namespace: String,
        /// Name of the lookup
        name: String,
    },
}

impl Error {
    /// Returns `true` if this error must abort the whole load transaction.
    ///
    /// Recoverable errors only invalidate the request that produced them.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Malformed { .. }
                | Error::OutOfBounds { .. }
                | Error::NotSupported
                | Error::Empty
                | Error::FileError(_)
                | Error::Decompression(_)
                | Error::RecursionLimit(_)
                | Error::LoadTransaction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(malformed_error!("broken outer chain").is_fatal());
        assert!(out_of_bounds_error!().is_fatal());
        assert!(Error::Decompression("bad stream".to_string()).is_fatal());

        let dead = Error::ExportDead {
            package: "Widgets".to_string(),
            index: 3,
            name: "Gizmo_0".to_string(),
        };
        assert!(!dead.is_fatal());
        assert!(!Error::ClassNotFound("Widget".to_string()).is_fatal());
    }

    #[test]
    fn test_malformed_message() {
        let err = malformed_error!("Invalid name index {} of {}", 12, 4);
        let text = err.to_string();
        assert!(text.contains("Invalid name index 12 of 4"));
        assert!(text.contains("error.rs"));
    }
}
