// Telegram layer - wire decoding and the update loop.

#[path = "update_decoder.rs"]
pub mod update_decoder;

#[path = "poller.rs"]
pub mod poller;
