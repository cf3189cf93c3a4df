use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{AccountInfo, Kline, OrderInfo, OrderSide, OrderStatus, OrderType, Position, PositionSide, SymbolPrecision};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::error::AdapterError;
use crate::futures::FuturesExchange;
use crate::precision::quantity_to_contracts;
use crate::retry::with_retry;

type HmacSha256 = Hmac<Sha256>;

/// Huobi/HTX USDT-margined swaps (`api.hbdm.com`). Like OKX, positions and
/// orders are denominated in contracts rather than base asset, so
/// `round_quantity` goes through [`quantity_to_contracts`]. Signing follows
/// the AWS-style query-string canonicalization Huobi shares with its spot
/// API: `METHOD\nHOST\nPATH\nsorted_query`, HMAC-SHA256, base64.
pub struct HuobiFutures {
    client: reqwest::Client,
    host: String,
    access_key: String,
    secret_key: String,
}

impl HuobiFutures {
    pub fn new(access_key: &str, secret_key: &str, _testnet: bool) -> Result<Self, AdapterError> {
        // Huobi's swap sandbox is a contract-whitelisted account on the
        // production host, not a separate domain.
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            host: "api.hbdm.com".to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn to_huobi_symbol(&self, symbol: &str) -> String {
        let stripped = symbol.replace('/', "").to_uppercase();
        if let Some(base) = stripped.strip_suffix("USDT") {
            format!("{base}-USDT")
        } else {
            stripped
        }
    }

    fn signed_query(&self, method: &str, path: &str, extra: &[(&str, String)]) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut params: Vec<(String, String)> = vec![
            ("AccessKeyId".to_string(), self.access_key.clone()),
            ("SignatureMethod".to_string(), "HmacSHA256".to_string()),
            ("SignatureVersion".to_string(), "2".to_string()),
            ("Timestamp".to_string(), timestamp),
        ];
        for (k, v) in extra {
            params.push((k.to_string(), v.clone()));
        }
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload = format!("{method}\n{}\n{path}\n{query}", self.host);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes()).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        format!("{query}&Signature={}", urlencode(&signature))
    }

    async fn get_signed<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, AdapterError> {
        with_retry(path, || async {
            let query = self.signed_query("GET", path, &[]);
            let url = format!("https://{}{path}?{query}", self.host);
            self.parse_envelope(self.client.get(&url).send().await?).await
        })
        .await
    }

    async fn post_signed<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> Result<T, AdapterError> {
        with_retry(path, || async {
            let query = self.signed_query("POST", path, &[]);
            let url = format!("https://{}{path}?{query}", self.host);
            self.parse_envelope(self.client.post(&url).json(body).send().await?).await
        })
        .await
    }

    async fn parse_envelope<T: for<'de> Deserialize<'de>>(&self, response: reqwest::Response) -> Result<T, AdapterError> {
        let status = response.status();
        let text = response.text().await?;

        #[derive(Deserialize)]
        struct Envelope<T> {
            status: String,
            #[serde(default)]
            err_code: Option<String>,
            #[serde(default)]
            err_msg: Option<String>,
            data: Option<T>,
        }

        if !status.is_success() {
            return Err(AdapterError::Exchange { code: status.to_string(), msg: text, retriable: status.as_u16() == 429 || status.as_u16() >= 500 });
        }

        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| AdapterError::Deserialization(format!("{e}: {text}")))?;
        if envelope.status == "ok" {
            envelope.data.ok_or_else(|| AdapterError::Deserialization("missing data field".to_string()))
        } else {
            Err(AdapterError::Exchange {
                code: envelope.err_code.unwrap_or_default(),
                msg: envelope.err_msg.unwrap_or_default(),
                retriable: false,
            })
        }
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl FuturesExchange for HuobiFutures {
    fn exchange_name(&self) -> &'static str {
        "HUOBI"
    }

    async fn test_connectivity(&self) -> Result<(), AdapterError> {
        let url = format!("https://{}/linear-swap-api/v1/swap_contract_info", self.host);
        self.client.get(&url).send().await?;
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "snake_case")]
        struct Raw {
            margin_balance: Decimal,
            margin_available: Decimal,
            margin_frozen: Decimal,
            profit_unreal: Decimal,
        }
        let raw: Vec<Raw> = self.post_signed("/linear-swap-api/v1/swap_cross_account_info", &serde_json::json!({"margin_account": "USDT"})).await?;
        let account = raw.into_iter().next().ok_or_else(|| AdapterError::Deserialization("no account returned".to_string()))?;

        Ok(AccountInfo {
            total_wallet_balance: account.margin_balance,
            available_balance: account.margin_available,
            used_margin: account.margin_frozen,
            unrealized_pnl: account.profit_unreal,
        })
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "snake_case")]
        struct Raw {
            contract_code: String,
            direction: String,
            volume: Decimal,
            cost_open: Decimal,
            last_price: Decimal,
            profit_unreal: Decimal,
            profit_rate: Decimal,
            lever_rate: u32,
        }
        let mut body = serde_json::json!({"margin_account": "USDT"});
        if let Some(s) = symbol {
            body["contract_code"] = Value::String(self.to_huobi_symbol(s));
        }
        let raw: Vec<Raw> = self.post_signed("/linear-swap-api/v1/swap_cross_position_info", &body).await?;

        Ok(raw
            .into_iter()
            .filter(|p| !p.volume.is_zero())
            .map(|p| Position {
                symbol: p.contract_code,
                side: if p.direction == "buy" { PositionSide::Long } else { PositionSide::Short },
                size: p.volume,
                entry_price: p.cost_open,
                mark_price: p.last_price,
                pnl: p.profit_unreal,
                percentage: p.profit_rate * Decimal::from(100),
                leverage: Some(p.lever_rate),
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError> {
        #[derive(Deserialize)]
        struct Raw {
            close: Decimal,
        }
        #[derive(Deserialize)]
        struct Envelope {
            tick: Raw,
        }
        let url = format!("https://{}/linear-swap-ex/market/detail/merged", self.host);
        let contract_code = self.to_huobi_symbol(symbol);
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("contract_code", contract_code)])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        Ok(envelope.tick.close)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterError> {
        let body = serde_json::json!({
            "contract_code": self.to_huobi_symbol(symbol),
            "lever_rate": leverage,
        });
        let _: Value = self.post_signed("/linear-swap-api/v1/swap_cross_switch_lever_rate", &body).await?;
        Ok(())
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "snake_case")]
        struct Raw {
            contract_code: String,
            contract_size: Decimal,
            price_tick: Decimal,
        }
        let url = format!("https://{}/linear-swap-api/v1/swap_contract_info", self.host);
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<Raw>,
        }
        let contract_code = self.to_huobi_symbol(symbol);
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("contract_code", &contract_code)])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        let raw = envelope
            .data
            .into_iter()
            .find(|c| c.contract_code == contract_code)
            .ok_or_else(|| AdapterError::UnknownPrecision(symbol.to_string()))?;

        Ok(SymbolPrecision {
            quantity_precision: 0,
            price_precision: raw.price_tick.scale(),
            step_size: Decimal::ONE,
            tick_size: raw.price_tick,
            min_qty: Decimal::ONE,
            min_notional: raw.contract_size,
            contract_value: Some(raw.contract_size),
        })
    }

    async fn round_quantity(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<Decimal, AdapterError> {
        let precision = self.get_symbol_precision(symbol).await?;
        quantity_to_contracts(symbol, qty, price, &precision)
    }

    async fn create_market_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "opponent", qty, None, false).await
    }

    async fn create_stop_loss_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_trigger_order(self, symbol, side, qty, stop_price, reduce_only).await
    }

    async fn create_take_profit_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_trigger_order(self, symbol, side, qty, stop_price, reduce_only).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderInfo>, AdapterError> {
        #[derive(Deserialize)]
        struct Page {
            orders: Vec<RawOrder>,
        }
        let body = serde_json::json!({"contract_code": self.to_huobi_symbol(symbol)});
        let page: Page = self.post_signed("/linear-swap-api/v1/swap_cross_openorders", &body).await?;
        Ok(page.orders.into_iter().map(RawOrder::into_order_info).collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({"contract_code": self.to_huobi_symbol(symbol), "order_id": order_id});
        let _: Value = self.post_signed("/linear-swap-api/v1/swap_cross_cancel", &body).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({"contract_code": self.to_huobi_symbol(symbol)});
        let _: Value = self.post_signed("/linear-swap-api/v1/swap_cross_cancelall", &body).await?;
        Ok(())
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32, _start: Option<DateTime<Utc>>, _end: Option<DateTime<Utc>>) -> Result<Vec<Kline>, AdapterError> {
        #[derive(Deserialize)]
        struct Raw {
            id: i64,
            open: Decimal,
            high: Decimal,
            low: Decimal,
            close: Decimal,
            vol: Decimal,
        }
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<Raw>,
        }
        let url = format!("https://{}/linear-swap-ex/market/history/kline", self.host);
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[
                ("contract_code", self.to_huobi_symbol(symbol)),
                ("period", interval.to_string()),
                ("size", limit.to_string()),
            ])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;

        envelope
            .data
            .into_iter()
            .map(|row| {
                let open_time = Utc.timestamp_opt(row.id, 0).single().ok_or_else(|| AdapterError::Deserialization("bad candle id".into()))?;
                Ok(Kline {
                    open_time,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.vol,
                    close_time: open_time,
                })
            })
            .collect()
    }

    fn normalize_symbol(&self, symbol: &str) -> String {
        self.to_huobi_symbol(symbol)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
struct RawOrder {
    order_id_str: String,
    client_order_id: Option<i64>,
    contract_code: String,
    direction: String,
    order_price_type: String,
    volume: Decimal,
    price: Decimal,
    status: i32,
    trade_volume: Decimal,
}

impl RawOrder {
    fn into_order_info(self) -> OrderInfo {
        OrderInfo {
            order_id: self.order_id_str,
            client_order_id: self.client_order_id.map(|id| id.to_string()).unwrap_or_default(),
            symbol: self.contract_code,
            side: if self.direction == "buy" { OrderSide::Buy } else { OrderSide::Sell },
            order_type: map_order_type(&self.order_price_type),
            quantity: self.volume,
            price: self.price,
            status: map_order_status(self.status),
            executed_qty: self.trade_volume,
        }
    }
}

async fn place_order(adapter: &HuobiFutures, symbol: &str, side: OrderSide, price_type: &str, qty: Decimal, price: Option<Decimal>, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
    let body = serde_json::json!({
        "contract_code": adapter.to_huobi_symbol(symbol),
        "direction": if side == OrderSide::Buy { "buy" } else { "sell" },
        "offset": if reduce_only { "close" } else { "open" },
        "volume": qty,
        "price": price.unwrap_or(Decimal::ZERO),
        "lever_rate": 1,
        "order_price_type": price_type,
    });
    let raw: RawOrder = adapter.post_signed("/linear-swap-api/v1/swap_cross_order", &body).await?;
    Ok(raw.into_order_info())
}

async fn place_trigger_order(adapter: &HuobiFutures, symbol: &str, side: OrderSide, qty: Decimal, trigger_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
    let body = serde_json::json!({
        "contract_code": adapter.to_huobi_symbol(symbol),
        "direction": if side == OrderSide::Buy { "buy" } else { "sell" },
        "offset": if reduce_only { "close" } else { "open" },
        "trigger_type": "le",
        "trigger_price": trigger_price,
        "order_price_type": "market",
        "volume": qty,
        "lever_rate": 1,
    });
    let raw: RawOrder = adapter.post_signed("/linear-swap-api/v1/swap_cross_trigger_order", &body).await?;
    Ok(raw.into_order_info())
}

fn map_order_type(s: &str) -> OrderType {
    match s {
        "limit" => OrderType::Limit,
        "opponent" | "optimal_5" | "optimal_10" | "optimal_20" => OrderType::Market,
        _ => OrderType::Market,
    }
}

fn map_order_status(code: i32) -> OrderStatus {
    match code {
        3 => OrderStatus::New,
        4 => OrderStatus::PartiallyFilled,
        6 => OrderStatus::Filled,
        7 => OrderStatus::Canceled,
        _ => OrderStatus::New,
    }
}
