//! Presentation collaborator interface.
//!
//! The engine never talks to a chat platform directly. Everything visible to
//! the user goes through a [`Presenter`]: creating and amending blocks,
//! reactions on the inbound message, error reports, and the terminal
//! notification with the full assistant text.
//!
//! Calls for one conversation turn are made sequentially and awaited in
//! order, so an implementation sees blocks in the order lines completed.

use crate::Result;
use crate::render::RenderBlock;
use async_trait::async_trait;
use std::fmt;

/// Reaction names used by the orchestrator.
pub mod reaction {
    /// Shown while a function call runs
    pub const FUNCTION_RUNNING: &str = "hourglass_flowing_sand";
    /// Shown after a failed function call
    pub const ERROR: &str = "x";
}

/// Opaque handle returned by [`Presenter::create_block`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Output side of one conversation.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Render a new block and return its handle.
    async fn create_block(&self, block: &RenderBlock) -> Result<BlockId>;

    /// Replace the contents of a block created earlier.
    async fn amend_block(&self, id: &BlockId, block: &RenderBlock) -> Result<()>;

    async fn add_reaction(&self, name: &str) -> Result<()>;

    async fn remove_reaction(&self, name: &str) -> Result<()>;

    /// Show a user-visible failure message.
    async fn report_error(&self, message: &str) -> Result<()>;

    /// Called once when a turn completes with the full assistant text.
    async fn complete(&self, _full_text: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting {
        created: Mutex<usize>,
    }

    #[async_trait]
    impl Presenter for Counting {
        async fn create_block(&self, _block: &RenderBlock) -> Result<BlockId> {
            let mut created = self.created.lock().unwrap();
            *created += 1;
            Ok(BlockId::new(format!("b{}", created)))
        }

        async fn amend_block(&self, _id: &BlockId, _block: &RenderBlock) -> Result<()> {
            Ok(())
        }

        async fn add_reaction(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn remove_reaction(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn report_error(&self, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_block_id_display() {
        let id = BlockId::from("1700000000.000100");
        assert_eq!(id.to_string(), "1700000000.000100");
        assert_eq!(id.as_str(), "1700000000.000100");
    }

    #[tokio::test]
    async fn test_default_complete_is_noop() {
        let presenter = Counting::default();
        presenter.complete("anything").await.unwrap();
        let id = presenter
            .create_block(&RenderBlock::markdown("x"))
            .await
            .unwrap();
        assert_eq!(id, BlockId::new("b1"));
    }

    #[test]
    fn test_presenter_is_object_safe() {
        let presenter: Box<dyn Presenter> = Box::new(Counting::default());
        let id = tokio_test::block_on(presenter.create_block(&RenderBlock::list("- a")))
            .unwrap();
        assert_eq!(id.as_str(), "b1");
    }
}
