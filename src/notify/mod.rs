pub mod email;
pub mod render;

pub use email::{NewsletterSender, SmtpSender};
pub use render::render_html;
