use std::time::Duration;

use color_eyre::Result;
use eyre::eyre;
use hyper::{client::HttpConnector, Body, Request, Uri};
use serde::{Deserialize, Serialize};

pub type HyperHttpClient = hyper::Client<HttpConnector>;

/// Key lights speak plain HTTP on the LAN and carry no credentials.
#[derive(Clone)]
pub struct HttpClient {
    client: HyperHttpClient,
    timeout: Duration,
}

pub fn mk_http_client(timeout: Duration) -> HttpClient {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(timeout));
    http.set_nodelay(true);

    // The panels' embedded servers drop idle connections quickly; reusing
    // them produces spurious "connection closed" errors.
    let client = hyper::Client::builder()
        .pool_max_idle_per_host(0)
        .build(http);

    HttpClient { client, timeout }
}

impl HttpClient {
    async fn send(&self, request: Request<Body>) -> Result<hyper::body::Bytes> {
        let uri = request.uri().clone();

        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let body_bytes = hyper::body::to_bytes(response.into_body()).await?;

            if !status.is_success() {
                return Err(eyre!("{} responded with status {}", uri, status));
            }

            Ok(body_bytes)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| eyre!("Request to {} timed out after {:?}", uri, self.timeout))?
    }
}

pub async fn mk_get_request<T: for<'a> Deserialize<'a>>(client: &HttpClient, uri: &Uri) -> Result<T> {
    let request = Request::builder()
        .method("GET")
        .header("Accept", "application/json")
        .uri(uri)
        .body(Body::empty())?;

    let body_bytes = client.send(request).await?;
    let de = &mut serde_json::Deserializer::from_slice(&body_bytes);
    let response: T = serde_path_to_error::deserialize(de)?;

    Ok(response)
}

/// PUT a JSON body. The response body is returned undecoded since the
/// devices echo back whatever state they accepted.
pub async fn mk_put_request<RequestBody>(
    client: &HttpClient,
    uri: &Uri,
    body: &RequestBody,
) -> Result<hyper::body::Bytes>
where
    RequestBody: Serialize,
{
    let body = serde_json::to_string(body)?;

    let request = Request::builder()
        .method("PUT")
        .header("Content-Type", "application/json")
        .uri(uri)
        .body(body.into())?;

    client.send(request).await
}
