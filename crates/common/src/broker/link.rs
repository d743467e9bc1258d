use crate::domain::MessageCategory;
use tokio_util::sync::CancellationToken;

/// Handle to the broker-side subscription for one category
///
/// Closing the handle stops delivery without invoking the link's
/// closed callback; that callback is reserved for closures initiated
/// by the broker.
#[derive(Debug, Clone)]
pub struct ConsumerLink {
    category: MessageCategory,
    close_token: CancellationToken,
}

impl ConsumerLink {
    pub fn new(category: MessageCategory, close_token: CancellationToken) -> Self {
        Self {
            category,
            close_token,
        }
    }

    pub fn category(&self) -> MessageCategory {
        self.category
    }

    pub fn close(&self) {
        self.close_token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close_token.is_cancelled()
    }
}
