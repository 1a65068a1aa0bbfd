use futures::future::BoxFuture;

use crate::core::model::ChatTurn;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the assistant's reply for an ordered role/content history.
pub trait ResponderPort: Send + Sync {
    fn respond<'a>(&'a self, turns: &'a [ChatTurn]) -> BoxFuture<'a, Result<String, DynError>>;
}
