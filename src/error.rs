use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::ElementId;

/// Errors raised by pipeline assembly and by pipe elements.
///
/// Construction-time variants (`Configuration`, `MissingFile`, `LabelParse`)
/// are fatal for the element being built. `EngineInvocation` carries the
/// detection engine's own error untouched.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{kind} file does not exist: {}", path.display())]
    MissingFile { kind: &'static str, path: PathBuf },

    #[error("malformed label at {}:{line}: {content:?}", path.display())]
    LabelParse {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("no label for class id {0}")]
    UnknownLabel(u32),

    #[error("detection engine failed: {0:#}")]
    EngineInvocation(#[source] anyhow::Error),

    #[error("element {element} expected a {expected} sample, received {found}")]
    UnexpectedSample {
        element: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("no element registered under {0}")]
    UnknownElement(ElementId),

    #[error("element {element} re-entered while already handling a sample (cyclic wiring)")]
    Reentrant { element: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame source failed: {0:#}")]
    Source(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
