//! Repository traits, one per aggregate.

pub mod file;
pub mod job;
pub mod link;
pub mod policy;
pub mod session;
pub mod user;

pub use file::{CommitOutcome, CommitUpload, FileRepository, OwnerUsage, PolicyUsage};
pub use job::JobRepository;
pub use link::LinkRepository;
pub use policy::PolicyRepository;
pub use session::{ChunkMark, SessionRepository};
pub use user::UserRepository;
