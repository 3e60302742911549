// libs/scheduling-cell/src/services/payment.rs
use reqwest::Client;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{PaymentIntent, PaymentIntentStatus, SchedulingError};

/// Payment gateway client. Booking only needs one question answered:
/// has this payment intent actually succeeded. The gateway is
/// Stripe-shaped (`GET /payment_intents/{id}` with a bearer secret).
pub struct PaymentVerificationService {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl PaymentVerificationService {
    pub fn new(config: &AppConfig) -> Result<Self, SchedulingError> {
        if !config.is_payments_configured() {
            return Err(SchedulingError::PaymentNotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            base_url: config.payment_gateway_base_url.clone(),
            secret_key: config.payment_gateway_secret_key.clone(),
        })
    }

    /// Fetch the intent and check it against the gateway.
    pub async fn verify_intent(&self, intent_id: &str) -> Result<PaymentIntent, SchedulingError> {
        debug!("Verifying payment intent {}", intent_id);

        let url = format!("{}/payment_intents/{}", self.base_url, intent_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .send()
            .await
            .map_err(|e| SchedulingError::PaymentGatewayError(e.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| SchedulingError::PaymentGatewayError(e.to_string()))?;

        if !status.is_success() {
            error!(
                "Payment intent lookup failed: {} - {}",
                status, response_text
            );
            return Err(SchedulingError::PaymentGatewayError(format!(
                "HTTP {}: {}",
                status, response_text
            )));
        }

        let intent: PaymentIntent = serde_json::from_str(&response_text)
            .map_err(|e| SchedulingError::PaymentGatewayError(format!(
                "Failed to parse payment intent: {}",
                e
            )))?;

        info!("Payment intent {} is {:?}", intent.id, intent.status);
        Ok(intent)
    }

    /// Verify and demand success in one step; the booking path uses
    /// this form.
    pub async fn require_succeeded(&self, intent_id: &str) -> Result<(), SchedulingError> {
        let intent = self.verify_intent(intent_id).await?;

        if intent.status != PaymentIntentStatus::Succeeded {
            return Err(SchedulingError::PaymentNotConfirmed);
        }

        Ok(())
    }
}
