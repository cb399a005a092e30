//! Authentication configuration loaded at startup.

const DEFAULT_ISSUER: &str = "gatekey";
const DEFAULT_TOTP_TOLERANCE_STEPS: u8 = 1;
const ENV_TOTP_ISSUER: &str = "GATEKEY_TOTP_ISSUER";
const ENV_TOTP_TOLERANCE: &str = "GATEKEY_TOTP_TOLERANCE";

/// Knobs for the authentication core: the issuer label stamped into TOTP
/// provisioning payloads and the clock-skew tolerance (in 30-second steps)
/// accepted during code validation.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    totp_tolerance_steps: u8,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            totp_tolerance_steps: DEFAULT_TOTP_TOLERANCE_STEPS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_totp_tolerance_steps(mut self, steps: u8) -> Self {
        self.totp_tolerance_steps = steps;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn totp_tolerance_steps(&self) -> u8 {
        self.totp_tolerance_steps
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(issuer) = std::env::var(ENV_TOTP_ISSUER) {
            let issuer = issuer.trim().to_string();
            if !issuer.is_empty() {
                config = config.with_issuer(issuer);
            }
        }
        if let Some(steps) = parse_u8_env(ENV_TOTP_TOLERANCE) {
            config = config.with_totp_tolerance_steps(steps);
        }
        config
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_u8_env(key: &str) -> Option<u8> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u8>().ok())
}
