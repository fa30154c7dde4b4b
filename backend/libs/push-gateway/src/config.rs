/// APNs Configuration
#[derive(Debug, Clone)]
pub struct ApnsConfig {
    pub certificate_path: String,
    pub certificate_passphrase: Option<String>,
    /// `apns-topic`, normally the app bundle id
    pub topic: String,
    pub is_production: bool,
}

impl ApnsConfig {
    /// Create new APNs configuration
    pub fn new(certificate_path: String, topic: String, is_production: bool) -> Self {
        Self {
            certificate_path,
            certificate_passphrase: None,
            topic,
            is_production,
        }
    }

    /// Set certificate passphrase
    pub fn with_passphrase(mut self, passphrase: String) -> Self {
        self.certificate_passphrase = Some(passphrase);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_passphrase() {
        let cfg = ApnsConfig::new("cert.p12".into(), "com.example.pulse".into(), false)
            .with_passphrase("secret".into());
        assert_eq!(cfg.certificate_passphrase.as_deref(), Some("secret"));
        assert_eq!(cfg.topic, "com.example.pulse");
    }
}
