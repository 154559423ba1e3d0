//! Verification email delivery.

use crate::config::SmtpConfig;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use tracing::{debug, error, info};

/// Outbound mail used to deliver verification links
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(
        &self,
        to_email: &str,
        display_name: Option<&str>,
        verification_link: &str,
    ) -> FaucetResult<()>;
}

/// SMTP mailer backed by lettre
#[derive(Debug)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from_address: Mailbox,
    subject: String,
}

impl SmtpMailer {
    /// Create a new SMTP mailer
    pub fn new(config: &SmtpConfig) -> FaucetResult<Self> {
        let from_address: Mailbox = config.from_address.parse()
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Invalid from address: {}", e)))?;

        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let transport = SmtpTransport::relay(&config.server)
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Failed to create SMTP transport: {}", e)))?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from_address,
            subject: config.subject.clone(),
        })
    }

    fn create_email_body(&self, display_name: Option<&str>, verification_link: &str) -> String {
        let greeting = match display_name {
            Some(name) if !name.trim().is_empty() => format!("Hi {},", name.trim()),
            _ => "Hi,".to_string(),
        };

        format!(
            r#"{}

Thanks for subscribing to the Sepolia test ETH faucet.

Confirm your email address by opening the link below:

{}

Once verified you can claim 0.02 test ETH per wallet every 24 hours.

If you did not sign up, please ignore this email.
"#,
            greeting, verification_link
        )
    }

    /// Test the SMTP configuration
    pub async fn test_connection(&self) -> FaucetResult<()> {
        debug!("Testing SMTP connection");

        let transport = self.transport.clone();
        let result = tokio::task::spawn_blocking(move || transport.test_connection()).await
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Task join error: {}", e)))?;

        match result {
            Ok(true) => {
                info!("SMTP connection test successful");
                Ok(())
            }
            Ok(false) => {
                error!("SMTP connection test failed");
                Err(FaucetError::EmailDelivery("SMTP connection test failed".to_string()))
            }
            Err(e) => {
                error!("SMTP connection error: {}", e);
                Err(FaucetError::EmailDelivery(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(
        &self,
        to_email: &str,
        display_name: Option<&str>,
        verification_link: &str,
    ) -> FaucetResult<()> {
        let to_address: Mailbox = to_email.parse()
            .map_err(|_| FaucetError::InvalidEmail(to_email.to_string()))?;

        let email = Message::builder()
            .from(self.from_address.clone())
            .to(to_address)
            .subject(&self.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(self.create_email_body(display_name, verification_link))
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Failed to build email: {}", e)))?;

        debug!("Sending verification email to: {}", to_email);

        // SmtpTransport is blocking
        let transport = self.transport.clone();
        let result = tokio::task::spawn_blocking(move || transport.send(&email)).await
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Task join error: {}", e)))?;

        match result {
            Ok(response) => {
                info!("Sent verification email to: {} (response: {:?})", to_email, response.code());
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to_email, e);
                Err(FaucetError::EmailDelivery(e.to_string()))
            }
        }
    }
}

/// Validate email address format
pub fn validate_email(email: &str) -> FaucetResult<()> {
    if !email.contains('@') || !email.contains('.') || email.len() < 5 {
        return Err(FaucetError::InvalidEmail(email.to_string()));
    }

    if email.contains(char::is_whitespace) {
        return Err(FaucetError::InvalidEmail(email.to_string()));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(FaucetError::InvalidEmail(email.to_string()));
    }

    let domain = parts[1];
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(FaucetError::InvalidEmail(email.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_smtp_config() -> SmtpConfig {
        SmtpConfig {
            server: "smtp.example.com".to_string(),
            port: 587,
            username: "test@example.com".to_string(),
            password: "password".to_string(),
            from_address: "faucet@example.com".to_string(),
            subject: "Verify your email for Sepolia Faucet".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn test_email_body_contains_link() {
        let mailer = SmtpMailer::new(&get_test_smtp_config()).unwrap();
        let link = "http://localhost:3000/verify?token=abc-123";

        let body = mailer.create_email_body(Some("Alice"), link);
        assert!(body.contains(link));
        assert!(body.starts_with("Hi Alice,"));
        assert!(body.contains("every 24 hours"));
    }

    #[test]
    fn test_email_body_without_name() {
        let mailer = SmtpMailer::new(&get_test_smtp_config()).unwrap();
        let body = mailer.create_email_body(Some("   "), "http://x/verify?token=t");
        assert!(body.starts_with("Hi,"));
    }

    #[test]
    fn test_invalid_from_address_rejected() {
        let mut config = get_test_smtp_config();
        config.from_address = "invalid-email".to_string();
        assert!(SmtpMailer::new(&config).is_err());
    }

    #[test]
    fn test_validate_email_valid() {
        assert!(validate_email("test@example.com").is_ok());
        assert!(validate_email("user.name+tag@domain.co.uk").is_ok());
        assert!(validate_email("a@b.c").is_ok());
    }

    #[test]
    fn test_validate_email_invalid() {
        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("test@").is_err());
        assert!(validate_email("test @example.com").is_err());
        assert!(validate_email("test@.com").is_err());
        assert!(validate_email("test@com.").is_err());
        assert!(validate_email("test@@example.com").is_err());
        assert!(validate_email("test@example@com").is_err());
    }
}
