use serde::Deserialize;

#[derive(Deserialize, Default)]
/// Query parameters of the board import endpoint.
/// `mode` is parsed into `ImportMode`; absent means merge.
pub struct ImportRequest {
    pub mode: Option<String>,
}
