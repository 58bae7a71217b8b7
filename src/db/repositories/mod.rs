mod posts;
mod subscription_state;
