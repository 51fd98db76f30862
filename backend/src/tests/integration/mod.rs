// Engine scenarios over the in-memory collaborators

mod quorum;
mod timeouts;
