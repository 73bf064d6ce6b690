use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Installs the aws-lc-rs provider as the process-wide rustls crypto provider.
///
/// Only the first call installs it. When another provider is already installed, that one is kept.
pub fn install_crypto_provider_for_bigquery() {
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("a rustls crypto provider is already installed");
        }
    });
}
