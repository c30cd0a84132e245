pub mod loms;
pub mod products;

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::ErrorResponse;

/// Posts a JSON body and decodes a JSON reply. A non-success status is reported with the
/// `error` field of the reply body when there is one.
async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    body: &Req,
) -> Result<Resp, String>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        let reason = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        return Err(format!("{} returned {}: {}", url, status, reason));
    }

    response.json::<Resp>().await.map_err(|e| e.to_string())
}
