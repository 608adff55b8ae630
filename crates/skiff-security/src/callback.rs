use crate::SecurityError;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const CONFIRMATION_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
<html><body>\
<h1>Authentication successful</h1>\
<p>You can close this window and return to the app.</p>\
</body></html>";

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

/// One-shot localhost listener for the OAuth redirect. The shell opens the
/// authorization URL in a browser; the provider redirects back here with the
/// code, and a small confirmation page is served.
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    /// Bind the redirect port. Port 3000 matches the registered redirect URI;
    /// port 0 picks an ephemeral port (tests).
    pub async fn bind(port: u16) -> Result<Self, SecurityError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SecurityError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept a single redirect request and return its parameters. The
    /// confirmation page is served either way.
    pub async fn recv(self) -> Result<CallbackParams, SecurityError> {
        let (mut stream, _peer) = self.listener.accept().await?;

        let mut buffer = vec![0u8; 4096];
        let read = stream.read(&mut buffer).await?;
        let request = String::from_utf8_lossy(&buffer[..read]).to_string();

        let params = parse_request_line(&request);
        let _ = stream.write_all(CONFIRMATION_PAGE.as_bytes()).await;
        let _ = stream.shutdown().await;

        params
    }
}

fn parse_request_line(request: &str) -> Result<CallbackParams, SecurityError> {
    let line = request
        .lines()
        .next()
        .ok_or_else(|| SecurityError::OAuth("empty callback request".to_string()))?;

    let query_start = line
        .find('?')
        .ok_or_else(|| SecurityError::OAuth("callback carried no query string".to_string()))?;
    let query_end = line
        .find(" HTTP/")
        .ok_or_else(|| SecurityError::OAuth("malformed callback request line".to_string()))?;
    if query_end <= query_start {
        return Err(SecurityError::OAuth(
            "malformed callback request line".to_string(),
        ));
    }

    let query = &line[query_start + 1..query_end];
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    if let Some(error) = params.get("error") {
        return Err(SecurityError::OAuth(format!(
            "authorization denied: {error}"
        )));
    }

    let code = params
        .get("code")
        .cloned()
        .ok_or_else(|| SecurityError::OAuth("callback carried no authorization code".to_string()))?;

    Ok(CallbackParams {
        code,
        state: params.get("state").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn callback_round_trip() {
        let server = CallbackServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /callback?code=abc123&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut response = Vec::new();
            let _ = stream.read_to_end(&mut response).await;
            String::from_utf8_lossy(&response).to_string()
        });

        let params = server.recv().await.unwrap();
        assert_eq!(params.code, "abc123");
        assert_eq!(params.state.as_deref(), Some("xyz"));

        let response = client.await.unwrap();
        assert!(response.contains("200 OK"));
        assert!(response.contains("Authentication successful"));
    }

    #[tokio::test]
    async fn denied_authorization_is_an_error() {
        let server = CallbackServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /callback?error=access_denied HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
        });

        assert!(server.recv().await.is_err());
    }

    #[test]
    fn request_line_without_query_is_rejected() {
        assert!(parse_request_line("GET /callback HTTP/1.1").is_err());
    }
}
