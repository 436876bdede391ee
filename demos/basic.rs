use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use restcall::{DispatchGate, Hooks, Priority, RequestOptions, RestClient};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Repo {
    full_name: String,
    stargazers_count: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let endpoint =
        std::env::var("RESTCALL_ENDPOINT_URL").unwrap_or_else(|_| "https://api.github.com".into());

    let client = RestClient::new(endpoint)
        .with_gate(DispatchGate::new(4)?)
        .with_hooks(Hooks::default().with_headers(|_: &RequestOptions| {
            let mut headers = HeaderMap::new();
            headers.insert(USER_AGENT, HeaderValue::from_static("restcall-demo"));
            headers
        }))
        .with_default_options(RequestOptions::default().with_retries(3).with_timeout_ms(10_000));

    let repo: Repo = client
        .get(
            "/repos/rust-lang/rust",
            RequestOptions::default().with_priority(Priority::High),
        )
        .await?;
    println!("{} has {} stars", repo.full_name, repo.stargazers_count);

    let first = client
        .get_conditional("/repos/rust-lang/cargo", RequestOptions::default())
        .await?;
    if let Some(etag) = first.etag {
        let again = client
            .get_conditional(
                "/repos/rust-lang/cargo",
                RequestOptions::default().with_etag(etag),
            )
            .await?;
        println!("unchanged since last fetch: {}", again.etag_matched);
    }

    Ok(())
}
