pub mod chat;
pub mod finetune;
pub mod model;
