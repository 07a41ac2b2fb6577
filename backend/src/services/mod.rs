// Outbound services used by the built-in actions

pub mod email;

pub use email::{EmailError, LoggingMailer, Mailer, OutgoingEmail, SmtpMailer};
