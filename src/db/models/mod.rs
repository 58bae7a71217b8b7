pub mod post;
pub mod subscription_state;

pub use post::Post;
pub use subscription_state::SubscriptionState;
