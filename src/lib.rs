pub mod error;
pub mod chunk;
pub mod format;
pub mod guano;
pub mod index;
pub mod io_stream;
pub mod event;
pub mod extract;
pub mod recording;

pub use error::{Result, WavError};
pub use chunk::{FourCc, ChunkHeader, read_chunk_header};
pub use format::FormatDescriptor;
pub use guano::{Metadata, MetadataValue};
pub use index::{Chunk, ChunkPayload, ContainerIndex};
pub use event::{Event, Span};
pub use recording::{ExtractOptions, Outcome, Recording};
