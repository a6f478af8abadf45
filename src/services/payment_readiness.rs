use crate::config::PaymentsConfig;
use crate::entities::order::{PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use serde::Serialize;

fn has_value(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
}

fn trimmed(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

/// Readiness of one provider, as reported on the status endpoint. Secrets
/// never appear here, only whether they exist and pass environment checks.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderReadiness {
    pub configured: bool,
    pub live_safe: bool,
    pub notes: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentReadiness {
    pub stripe: ProviderReadiness,
    pub paypal: ProviderReadiness,
    pub paypal_env: String,
    pub paypal_env_valid: bool,
    pub easypaisa: ProviderReadiness,
    pub jazzcash: ProviderReadiness,
}

/// Computes provider readiness from configuration alone. Pure; no provider
/// is contacted.
pub fn payment_readiness(payments: &PaymentsConfig, production: bool) -> PaymentReadiness {
    let stripe_key = trimmed(&payments.stripe_secret_key);
    let stripe_webhook = trimmed(&payments.stripe_webhook_secret);
    let stripe_configured = !stripe_key.is_empty() && !stripe_webhook.is_empty();
    let stripe_live_like =
        stripe_key.starts_with("sk_live_") && stripe_webhook.starts_with("whsec_");

    let paypal_configured = has_value(&payments.paypal_client_id)
        && has_value(&payments.paypal_client_secret)
        && has_value(&payments.paypal_webhook_id);
    let paypal_env = payments.paypal_env.trim().to_lowercase();
    let paypal_env_valid = paypal_env == "sandbox" || paypal_env == "live";

    let easypaisa_configured = has_value(&payments.easypaisa_merchant_id);
    let jazzcash_configured = has_value(&payments.jazzcash_merchant_id);

    PaymentReadiness {
        stripe: ProviderReadiness {
            configured: stripe_configured,
            live_safe: !production || stripe_live_like,
            notes: if !stripe_configured {
                "Missing Stripe secret key or webhook secret".to_string()
            } else if production && !stripe_live_like {
                "Production should use live Stripe credentials.".to_string()
            } else {
                "Ready".to_string()
            },
        },
        paypal: ProviderReadiness {
            configured: paypal_configured,
            live_safe: !production || paypal_env == "live",
            notes: if !paypal_configured {
                "Missing PayPal credentials or webhook id".to_string()
            } else if !paypal_env_valid {
                "PayPal environment must be sandbox or live".to_string()
            } else if production && paypal_env != "live" {
                "Production should use the live PayPal environment.".to_string()
            } else {
                "Ready".to_string()
            },
        },
        paypal_env,
        paypal_env_valid,
        easypaisa: ProviderReadiness {
            configured: easypaisa_configured,
            live_safe: true,
            notes: if easypaisa_configured {
                "Ready".to_string()
            } else {
                "Missing EasyPaisa merchant id".to_string()
            },
        },
        jazzcash: ProviderReadiness {
            configured: jazzcash_configured,
            live_safe: true,
            notes: if jazzcash_configured {
                "Ready".to_string()
            } else {
                "Missing JazzCash merchant id".to_string()
            },
        },
    }
}

/// Gate for the selected payment method. Runs before any order number is
/// allocated or stock touched; a half-configured provider must never accept
/// an order it cannot settle.
pub fn validate_selected_method(
    label: &str,
    payments: &PaymentsConfig,
    production: bool,
) -> Result<(PaymentMethod, PaymentStatus), ServiceError> {
    let label = label.trim();
    let label = if label.is_empty() {
        "Cash on Delivery"
    } else {
        label
    };
    let method = PaymentMethod::from_label(label).ok_or(ServiceError::UnsupportedMethod)?;

    if method == PaymentMethod::CashOnDelivery {
        return Ok((method, PaymentStatus::PendingCod));
    }

    let readiness = payment_readiness(payments, production);
    match method {
        PaymentMethod::Stripe => {
            if !readiness.stripe.configured || !readiness.stripe.live_safe {
                return Err(ServiceError::NotConfigured(
                    "Stripe is not fully configured for this environment.".to_string(),
                ));
            }
        }
        PaymentMethod::PayPal => {
            if !readiness.paypal.configured
                || !readiness.paypal_env_valid
                || !readiness.paypal.live_safe
            {
                return Err(ServiceError::NotConfigured(
                    "PayPal is not fully configured for this environment.".to_string(),
                ));
            }
        }
        PaymentMethod::EasyPaisa => {
            if !readiness.easypaisa.configured {
                return Err(ServiceError::NotConfigured(
                    "EasyPaisa is not configured yet.".to_string(),
                ));
            }
        }
        PaymentMethod::JazzCash => {
            if !readiness.jazzcash.configured {
                return Err(ServiceError::NotConfigured(
                    "JazzCash is not configured yet.".to_string(),
                ));
            }
        }
        PaymentMethod::CashOnDelivery => unreachable!(),
    }

    Ok((method, PaymentStatus::PendingOnline))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripe_config(key: &str, webhook: &str) -> PaymentsConfig {
        PaymentsConfig {
            stripe_secret_key: Some(key.to_string()),
            stripe_webhook_secret: Some(webhook.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn cod_is_always_accepted() {
        let payments = PaymentsConfig::default();
        let (method, status) =
            validate_selected_method("Cash on Delivery", &payments, true).unwrap();
        assert_eq!(method, PaymentMethod::CashOnDelivery);
        assert_eq!(status, PaymentStatus::PendingCod);
    }

    #[test]
    fn blank_method_defaults_to_cod() {
        let payments = PaymentsConfig::default();
        let (method, _) = validate_selected_method("  ", &payments, false).unwrap();
        assert_eq!(method, PaymentMethod::CashOnDelivery);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let payments = PaymentsConfig::default();
        let err = validate_selected_method("Bank Transfer", &payments, false).unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedMethod));
    }

    #[test]
    fn stripe_requires_both_secrets() {
        let payments = PaymentsConfig {
            stripe_secret_key: Some("sk_test_123".to_string()),
            ..Default::default()
        };
        assert!(validate_selected_method("Stripe (Card)", &payments, false).is_err());

        let payments = stripe_config("sk_test_123", "whsec_abc");
        let (_, status) = validate_selected_method("Stripe (Card)", &payments, false).unwrap();
        assert_eq!(status, PaymentStatus::PendingOnline);
    }

    #[test]
    fn stripe_test_keys_rejected_in_production() {
        let payments = stripe_config("sk_test_123", "whsec_abc");
        assert!(validate_selected_method("Stripe (Card)", &payments, true).is_err());

        let payments = stripe_config("sk_live_123", "whsec_abc");
        assert!(validate_selected_method("Stripe (Card)", &payments, true).is_ok());
    }

    #[test]
    fn paypal_env_must_be_known_and_live_in_production() {
        let mut payments = PaymentsConfig {
            paypal_client_id: Some("id".to_string()),
            paypal_client_secret: Some("secret".to_string()),
            paypal_webhook_id: Some("wh".to_string()),
            paypal_env: "staging".to_string(),
            ..Default::default()
        };
        assert!(validate_selected_method("PayPal", &payments, false).is_err());

        payments.paypal_env = "sandbox".to_string();
        assert!(validate_selected_method("PayPal", &payments, false).is_ok());
        assert!(validate_selected_method("PayPal", &payments, true).is_err());

        payments.paypal_env = "live".to_string();
        assert!(validate_selected_method("PayPal", &payments, true).is_ok());
    }

    #[test]
    fn wallets_need_merchant_ids() {
        let payments = PaymentsConfig::default();
        assert!(validate_selected_method("EasyPaisa", &payments, false).is_err());
        assert!(validate_selected_method("JazzCash", &payments, false).is_err());

        let payments = PaymentsConfig {
            easypaisa_merchant_id: Some("EP-1".to_string()),
            jazzcash_merchant_id: Some("JC-1".to_string()),
            ..Default::default()
        };
        let (_, status) = validate_selected_method("EasyPaisa", &payments, false).unwrap();
        assert_eq!(status, PaymentStatus::PendingOnline);
        assert!(validate_selected_method("JazzCash", &payments, false).is_ok());
    }

    #[test]
    fn readiness_report_never_carries_secrets() {
        let payments = stripe_config("sk_live_ultra_secret", "whsec_hidden");
        let readiness = payment_readiness(&payments, true);
        let json = serde_json::to_string(&readiness).unwrap();
        assert!(!json.contains("ultra_secret"));
        assert!(!json.contains("whsec_hidden"));
    }
}
