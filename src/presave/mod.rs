//! Handlers run on every resource right before it is written.
//!
//! The standard pipeline makes sure every persisted document carries an
//! authority code, a stable global id, and global identity side-data on each
//! embedded reference. Handlers run in order and must be idempotent: the
//! update path runs them on both the incoming and the patched document.

mod authority;
mod global_id;
mod references;

pub use authority::AuthorityTagHandler;
pub use global_id::GlobalIdHandler;
pub use references::ReferenceGlobalIdHandler;

use tracing::trace;

use crate::error::MergeResult;
use crate::resource::Resource;

/// One pre-save step.
pub trait PreSaveHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Adjusts `resource` in place.
    fn pre_save(&self, resource: &mut Resource) -> MergeResult<()>;
}

/// Ordered list of pre-save handlers.
pub struct PreSavePipeline {
    handlers: Vec<Box<dyn PreSaveHandler>>,
}

impl std::fmt::Debug for PreSavePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Default for PreSavePipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl PreSavePipeline {
    /// Authority tags, then global id, then reference identities.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(AuthorityTagHandler),
            Box::new(GlobalIdHandler),
            Box::new(ReferenceGlobalIdHandler),
        ])
    }

    #[must_use]
    pub fn new(handlers: Vec<Box<dyn PreSaveHandler>>) -> Self {
        Self { handlers }
    }

    /// Appends a handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Box<dyn PreSaveHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|h| h.name())
    }

    /// Runs every handler in order, stopping at the first error.
    pub fn run(&self, resource: &mut Resource) -> MergeResult<()> {
        for handler in &self.handlers {
            handler.pre_save(resource)?;
            trace!(
                handler = handler.name(),
                resource = %resource.reference_key(),
                "pre-save handler applied"
            );
        }
        Ok(())
    }
}
