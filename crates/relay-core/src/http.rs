/// Reads the status and body text off a non-success upstream response so
/// callers can feed both into [`crate::RelayError::from_response_body`].
pub async fn read_error_response_body(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read response body: {}>", e));
    (status, body)
}
