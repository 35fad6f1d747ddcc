//! Split large files into fixed-size chunks, describe them in a map file, and
//! later verify or reassemble the chunks from that map.

pub mod cancel;
pub mod config;
pub mod error;
pub mod hash;
mod ini;
pub mod map;
pub mod path_safety;
pub mod progress;
pub mod reassemble;
pub mod split;
pub mod verify;

pub use cancel::CancelToken;
pub use config::Defaults;
pub use error::{Error, ErrorKind, Result};
pub use hash::{Accumulator, HashAlgorithm};
pub use map::{ChunkRecord, FileSection, MapFile};
pub use path_safety::{ChunkDir, ChunkResolver, PathPolicy};
pub use reassemble::{reassemble, ReassembleOptions, ReassembleReport};
pub use split::{PathMode, SplitOptions, Splitter};
pub use verify::{verify, ChunkFailure, FailureReason, VerifyOptions, VerifyReport};
