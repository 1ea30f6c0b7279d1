use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::RequestSigner;
use crate::ports::{
    BookingEvent, LedgerMovement, LedgerPort, NotificationPort, PaymentConfirmation, PaymentPort,
    PortError,
};

/// HTTP client that signs every request with the shared key pair
pub struct SignedClient {
    client: Client,
    endpoint: String,
    key_id: String,
    secret: String,
}

impl SignedClient {
    pub fn new(endpoint: &str, key_id: &str, secret: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            secret: secret.to_string(),
        }
    }

    /// POST a JSON body and return the raw response once it is known to be
    /// successful
    async fn post<B: Serialize>(&self, uri: &str, body: &B) -> Result<reqwest::Response, PortError> {
        let url = format!("{}{}", self.endpoint, uri);
        let request_body =
            serde_json::to_string(body).map_err(|e| PortError::InvalidResponse(e.to_string()))?;

        let timestamp = RequestSigner::get_timestamp();
        let nonce = RequestSigner::generate_nonce();
        let signature = RequestSigner::generate_signature(
            &self.key_id,
            &self.secret,
            "POST",
            uri,
            timestamp,
            &nonce,
            &request_body,
        );

        debug!("POST {}", url);

        let res = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Key", &self.key_id)
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Nonce", &nonce)
            .header("X-Signature", signature)
            .body(request_body)
            .send()
            .await?;

        let status = res.status();
        info!("Response from {} received with status: {}", uri, status);

        if status.is_success() {
            return Ok(res);
        }

        let detail = res.text().await.unwrap_or_default();
        if status == StatusCode::PAYMENT_REQUIRED || status.is_client_error() {
            Err(PortError::Declined(format!("{}: {}", status, detail)))
        } else {
            Err(PortError::Unavailable(format!("{}: {}", status, detail)))
        }
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        uri: &str,
        body: &B,
    ) -> Result<R, PortError> {
        let res = self.post(uri, body).await?;
        Ok(res.json::<R>().await?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeRequest<'a> {
    amount: i64,
    payer_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    payment_ref: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRefRequest<'a> {
    payment_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    payment_ref: String,
    payer_id: String,
    amount: i64,
    status: String,
}

/// Payment provider reached over HTTP
pub struct HttpPaymentClient {
    inner: SignedClient,
}

impl HttpPaymentClient {
    pub fn new(endpoint: &str, key_id: &str, secret: &str) -> Self {
        Self {
            inner: SignedClient::new(endpoint, key_id, secret),
        }
    }
}

#[async_trait]
impl PaymentPort for HttpPaymentClient {
    async fn authorize(&self, amount: i64, payer_id: &str) -> Result<String, PortError> {
        info!("Authorizing balance debit of {} for {}", amount, payer_id);
        let response: AuthorizeResponse = self
            .inner
            .post_json("/v1/payments/authorize", &AuthorizeRequest { amount, payer_id })
            .await?;
        Ok(response.payment_ref)
    }

    async fn verify(&self, payment_ref: &str) -> Result<PaymentConfirmation, PortError> {
        info!("Verifying payment {}", payment_ref);
        let response: VerifyResponse = self
            .inner
            .post_json(
                "/v1/payments/verify",
                &PaymentRefRequest {
                    payment_ref,
                    amount: None,
                },
            )
            .await?;

        if response.status != "captured" {
            warn!("Payment {} reported status {}", payment_ref, response.status);
            return Err(PortError::Declined(format!(
                "payment {} is {}",
                payment_ref, response.status
            )));
        }

        Ok(PaymentConfirmation {
            payment_ref: response.payment_ref,
            payer_id: response.payer_id,
            amount: response.amount,
        })
    }

    async fn refund(&self, payment_ref: &str, amount: i64) -> Result<(), PortError> {
        info!("Refunding {} for payment {}", amount, payment_ref);
        self.inner
            .post(
                "/v1/payments/refund",
                &PaymentRefRequest {
                    payment_ref,
                    amount: Some(amount),
                },
            )
            .await?;
        Ok(())
    }
}

/// Ledger service reached over HTTP
pub struct HttpLedgerClient {
    inner: SignedClient,
}

impl HttpLedgerClient {
    pub fn new(endpoint: &str, key_id: &str, secret: &str) -> Self {
        Self {
            inner: SignedClient::new(endpoint, key_id, secret),
        }
    }
}

#[async_trait]
impl LedgerPort for HttpLedgerClient {
    async fn record_movement(&self, movement: LedgerMovement) -> Result<(), PortError> {
        self.inner.post("/v1/movements", &movement).await?;
        Ok(())
    }
}

/// Posts booking events to a webhook
pub struct WebhookNotifier {
    inner: SignedClient,
}

impl WebhookNotifier {
    pub fn new(webhook_url: &str, key_id: &str, secret: &str) -> Self {
        Self {
            inner: SignedClient::new(webhook_url, key_id, secret),
        }
    }
}

#[async_trait]
impl NotificationPort for WebhookNotifier {
    async fn notify(&self, event: BookingEvent) -> Result<(), PortError> {
        self.inner.post("", &event).await?;
        Ok(())
    }
}
