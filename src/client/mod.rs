//! Brain-side access to the body: HTTP calls, paced chunk pulling and the
//! byte-stream view consumed by the phrase recorder

mod body;
mod puller;
mod rate;
mod session;
mod stream;

pub use body::BodyClient;
pub use puller::{AdaptivePuller, ChunkStream};
pub use rate::{PullRate, correction_factor};
pub use session::ListeningSession;
pub use stream::AudioStream;
