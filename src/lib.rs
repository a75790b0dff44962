pub mod gateway;
pub mod logging;
pub mod reconcile;

// Customize these constants for your bot
pub const BOT_NAME: &str = "join_warden";
pub const RECONCILE_TARGET: &str = "join_warden::reconcile";
pub const GATEWAY_TARGET: &str = "join_warden::gateway";
pub const ERROR_TARGET: &str = "join_warden::error";
pub const CONSOLE_TARGET: &str = "join_warden";

pub use gateway::{GatewayError, MessagingGateway, TelegramGateway};
pub use reconcile::{ReconcileConfig, ReconcileRequest, ReconcileService};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
