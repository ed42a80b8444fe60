use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::SheetsConfig;
use sheetsync_domain::ports::sheets::SheetsApi;
use sheetsync_errors::{SyncError, SyncResult};

/// Google Sheets v4 REST客户端
///
/// 范围字符串作为URL路径段传递，由Url编码处理任意Unicode工作表名。
/// 429限流按配置做有界重试，其余错误直接上抛。
pub struct GoogleSheetsClient {
    http: Client,
    config: SheetsConfig,
}

impl GoogleSheetsClient {
    pub fn new(config: SheetsConfig) -> SyncResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::sheet_api_error(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http, config })
    }

    fn build_url(&self, spreadsheet_id: &str, tail: Option<&str>) -> SyncResult<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| SyncError::config_error(format!("无效的Sheets基础地址: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SyncError::config_error("Sheets基础地址不可作为base".to_string()))?;
            segments.pop_if_empty().push("spreadsheets").push(spreadsheet_id);
            if let Some(tail) = tail {
                // push会对路径段做百分号编码，Unicode工作表名由此安全通过
                segments.push("values").push(tail);
            }
        }
        if let Some(key) = &self.config.api_key {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url)
    }

    async fn get_with_retry(&self, url: Url) -> SyncResult<serde_json::Value> {
        let mut attempt = 0;
        loop {
            let mut request = self.http.get(url.clone());
            if let Some(token) = &self.config.access_token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| SyncError::sheet_api_error(format!("请求失败: {e}")))?;

            match response.status() {
                StatusCode::TOO_MANY_REQUESTS if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "Sheets API rate limited, retry {}/{} after {}ms",
                        attempt, self.config.max_retries, self.config.retry_delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_delay_ms * u64::from(attempt),
                    ))
                    .await;
                }
                status if status.is_success() => {
                    return response.json().await.map_err(|e| {
                        SyncError::sheet_api_error(format!("解析响应失败: {e}"))
                    });
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(SyncError::sheet_api_error(format!(
                        "HTTP {status}: {body}"
                    )));
                }
            }
        }
    }
}

fn values_from_response(body: &serde_json::Value) -> Vec<Vec<String>> {
    // 空工作表的响应没有values键，返回空网格而不是错误
    body.get("values")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|c| match c {
                                    serde_json::Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn list_sheets(&self, spreadsheet_id: &str) -> SyncResult<Vec<String>> {
        let mut url = self.build_url(spreadsheet_id, None)?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let body = self.get_with_retry(url).await?;
        let titles: Vec<String> = body
            .get("sheets")
            .and_then(|s| s.as_array())
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|s| {
                        s.pointer("/properties/title")
                            .and_then(|t| t.as_str())
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();
        debug!("Listed {} sheets in {}", titles.len(), spreadsheet_id);
        Ok(titles)
    }

    async fn read_range(&self, spreadsheet_id: &str, range: &str) -> SyncResult<Vec<Vec<String>>> {
        let url = self.build_url(spreadsheet_id, Some(range))?;
        let body = self.get_with_retry(url).await?;
        Ok(values_from_response(&body))
    }

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> SyncResult<()> {
        let mut url = self.build_url(spreadsheet_id, Some(range))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW");

        let mut request = self.http.put(url).json(&json!({
            "range": range,
            "values": values,
        }));
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::sheet_api_error(format!("写入请求失败: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::sheet_api_error(format!(
                "写入失败 HTTP {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_from_response_empty_sheet() {
        let body = json!({"range": "Sheet1!A1:Z1000", "majorDimension": "ROWS"});
        assert!(values_from_response(&body).is_empty());
    }

    #[test]
    fn test_values_from_response_mixed_cells() {
        let body = json!({"values": [["Ali", "0100", 42], ["", "x"]]});
        let grid = values_from_response(&body);
        assert_eq!(grid[0], vec!["Ali", "0100", "42"]);
        assert_eq!(grid[1], vec!["", "x"]);
    }
}
