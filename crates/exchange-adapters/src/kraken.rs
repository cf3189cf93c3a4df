use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{AccountInfo, Kline, OrderInfo, OrderSide, OrderStatus, OrderType, Position, PositionSide, SymbolPrecision};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::sign_kraken;
use crate::error::AdapterError;
use crate::futures::FuturesExchange;
use crate::retry::with_retry;

/// Kraken Futures. Leverage is fixed per contract (`set_leverage` is a no-op)
/// and size is always an integer contract count — no `round_quantity`
/// fractional math like the base-asset exchanges. Signing is the odd one
/// out: HMAC-SHA512 over `body + nonce + path`, keyed by a base64-decoded
/// secret, with the digest itself base64-encoded.
pub struct KrakenFutures {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    nonce_counter: AtomicI64,
}

impl KrakenFutures {
    pub fn new(api_key: &str, api_secret: &str, testnet: bool) -> Result<Self, AdapterError> {
        let base_url = if testnet { "https://demo-futures.kraken.com" } else { "https://futures.kraken.com" }.to_string();
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            nonce_counter: AtomicI64::new(0),
        })
    }

    fn next_nonce(&self) -> String {
        let n = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{:04}", chrono::Utc::now().timestamp_millis(), n % 10000)
    }

    fn to_kraken_symbol(symbol: &str) -> String {
        let base = symbol.replace('/', "").to_uppercase();
        let mapped = base.replacen("BTC", "XBT", 1);
        format!("PF_{}", mapped.replace("USDT", "USD"))
    }

    fn from_kraken_symbol(symbol: &str) -> String {
        symbol.trim_start_matches("PF_").trim_start_matches("PI_").replacen("XBT", "BTC", 1).to_string() + "USDT"
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        endpoint_path: &str,
        body: &str,
    ) -> Result<T, AdapterError> {
        with_retry(endpoint_path, || async {
            let nonce = self.next_nonce();
            let signature = sign_kraken(&self.api_secret, endpoint_path, &nonce, body)
                .map_err(|e| AdapterError::Deserialization(e))?;

            let mut headers = HeaderMap::new();
            headers.insert("APIKey", HeaderValue::from_str(&self.api_key).unwrap());
            headers.insert("Nonce", HeaderValue::from_str(&nonce).unwrap());
            headers.insert("Authent", HeaderValue::from_str(&signature).unwrap());
            if matches!(method, reqwest::Method::POST) {
                headers.insert("Content-Type", HeaderValue::from_static("application/x-www-form-urlencoded"));
            }

            let url = format!("{}{}", self.base_url, endpoint_path);
            let request = match method {
                reqwest::Method::POST => self.client.post(&url).headers(headers).body(body.to_string()),
                _ => self.client.get(&format!("{url}?{body}")).headers(headers),
            };

            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;

            #[derive(Deserialize)]
            struct Envelope {
                result: String,
                #[serde(default)]
                error: Option<String>,
            }

            if !status.is_success() {
                return Err(AdapterError::Exchange { code: status.to_string(), msg: text, retriable: status.as_u16() == 429 || status.as_u16() >= 500 });
            }

            let envelope: Envelope = serde_json::from_str(&text).map_err(|e| AdapterError::Deserialization(format!("{e}: {text}")))?;
            if envelope.result == "success" {
                serde_json::from_str::<T>(&text).map_err(|e| AdapterError::Deserialization(e.to_string()))
            } else {
                let msg = envelope.error.unwrap_or_else(|| "unknown Kraken error".to_string());
                Err(AdapterError::Exchange { code: "error".to_string(), msg: msg.clone(), retriable: msg.to_lowercase().contains("rate limit") })
            }
        })
        .await
    }
}

#[async_trait]
impl FuturesExchange for KrakenFutures {
    fn exchange_name(&self) -> &'static str {
        "KRAKEN"
    }

    async fn test_connectivity(&self) -> Result<(), AdapterError> {
        let url = format!("{}/derivatives/api/v3/instruments", self.base_url);
        self.client.get(&url).send().await?;
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError> {
        #[derive(Deserialize)]
        struct Accounts {
            accounts: std::collections::HashMap<String, Account>,
        }
        #[derive(Deserialize)]
        struct Account {
            #[serde(rename = "portfolioValue")]
            portfolio_value: Decimal,
            #[serde(rename = "availableMargin")]
            available_margin: Decimal,
            #[serde(rename = "unrealizedPnl", default)]
            unrealized_pnl: Decimal,
        }
        let accounts: Accounts = self.signed_request(reqwest::Method::GET, "/derivatives/api/v3/accounts", "").await?;
        let flex = accounts.accounts.values().next().ok_or_else(|| AdapterError::Deserialization("no accounts returned".to_string()))?;

        Ok(AccountInfo {
            total_wallet_balance: flex.portfolio_value,
            available_balance: flex.available_margin,
            used_margin: flex.portfolio_value - flex.available_margin,
            unrealized_pnl: flex.unrealized_pnl,
        })
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            #[serde(rename = "openPositions")]
            open_positions: Vec<Raw>,
        }
        #[derive(Deserialize)]
        struct Raw {
            symbol: String,
            side: String,
            size: Decimal,
            price: Decimal,
            #[serde(rename = "markPrice", default)]
            mark_price: Decimal,
            #[serde(rename = "unrealizedFunding", default)]
            unrealized_funding: Decimal,
        }
        let result: Result_ = self.signed_request(reqwest::Method::GET, "/derivatives/api/v3/openpositions", "").await?;
        let _ = symbol;

        Ok(result
            .open_positions
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .map(|p| {
                let price_pnl = (p.mark_price - p.price) * p.size;
                Position {
                    symbol: Self::from_kraken_symbol(&p.symbol),
                    side: if p.side == "long" { PositionSide::Long } else { PositionSide::Short },
                    size: p.size,
                    entry_price: p.price,
                    mark_price: p.mark_price,
                    pnl: price_pnl + p.unrealized_funding,
                    percentage: Decimal::ZERO,
                    leverage: None, // fixed per-contract; not a per-position attribute here
                }
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError> {
        #[derive(Deserialize)]
        struct Ticker {
            last: Decimal,
        }
        #[derive(Deserialize)]
        struct Envelope {
            tickers: Vec<Ticker>,
        }
        let url = format!("{}/derivatives/api/v3/tickers", self.base_url);
        let envelope: Envelope = self.client.get(&url).send().await?.json().await.map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        let _ = symbol;
        envelope.tickers.into_iter().next().map(|t| t.last).ok_or_else(|| AdapterError::Deserialization(format!("no ticker for {symbol}")))
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), AdapterError> {
        tracing::warn!("Kraken Futures has fixed leverage per contract; set_leverage is a no-op");
        Ok(())
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        let _ = symbol;
        // Kraken quotes size as whole contracts; there is no fractional step.
        Ok(SymbolPrecision {
            quantity_precision: 0,
            price_precision: 1,
            step_size: Decimal::ONE,
            tick_size: Decimal::new(1, 1),
            min_qty: Decimal::ONE,
            min_notional: Decimal::ZERO,
            contract_value: None,
        })
    }

    async fn round_quantity(&self, _symbol: &str, qty: Decimal, _price: Decimal) -> Result<Decimal, AdapterError> {
        Ok(qty.trunc())
    }

    async fn create_market_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "mkt", qty, None, false).await
    }

    async fn create_stop_loss_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "stp", qty, Some(stop_price), reduce_only).await
    }

    async fn create_take_profit_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "take_profit", qty, Some(stop_price), reduce_only).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderInfo>, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            #[serde(rename = "openOrders")]
            open_orders: Vec<RawOrder>,
        }
        let result: Result_ = self.signed_request(reqwest::Method::GET, "/derivatives/api/v3/openorders", "").await?;
        let kraken_symbol = Self::to_kraken_symbol(symbol);
        Ok(result.open_orders.into_iter().filter(|o| o.symbol == kraken_symbol).map(RawOrder::into_order_info).collect())
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), AdapterError> {
        let body = format!("order_id={order_id}");
        let _: Value = self.signed_request(reqwest::Method::POST, "/derivatives/api/v3/cancelorder", &body).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AdapterError> {
        let body = format!("symbol={}", Self::to_kraken_symbol(symbol));
        let _: Value = self.signed_request(reqwest::Method::POST, "/derivatives/api/v3/cancelallorders", &body).await?;
        Ok(())
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Vec<Kline>, AdapterError> {
        #[derive(Deserialize)]
        struct Candle {
            time: i64,
            open: String,
            high: String,
            low: String,
            close: String,
            volume: String,
        }
        #[derive(Deserialize)]
        struct Envelope {
            candles: Vec<Candle>,
        }
        let url = format!("{}/api/charts/v1/trade/{}/{}", self.base_url, Self::to_kraken_symbol(symbol), interval);
        let mut req = self.client.get(&url).query(&[("count", limit.to_string())]);
        if let Some(s) = start {
            req = req.query(&[("from", s.timestamp().to_string())]);
        }
        if let Some(e) = end {
            req = req.query(&[("to", e.timestamp().to_string())]);
        }
        let envelope: Envelope = req.send().await?.json().await.map_err(|e| AdapterError::Deserialization(e.to_string()))?;

        envelope
            .candles
            .into_iter()
            .map(|c| {
                Ok(Kline {
                    open_time: Utc.timestamp_millis_opt(c.time).single().ok_or_else(|| AdapterError::Deserialization("bad candle time".into()))?,
                    open: Decimal::from_str(&c.open).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    high: Decimal::from_str(&c.high).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    low: Decimal::from_str(&c.low).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close: Decimal::from_str(&c.close).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    volume: Decimal::from_str(&c.volume).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close_time: Utc.timestamp_millis_opt(c.time).single().unwrap(),
                })
            })
            .collect()
    }

    fn normalize_symbol(&self, symbol: &str) -> String {
        Self::to_kraken_symbol(symbol)
    }
}

#[derive(Deserialize)]
struct RawOrder {
    order_id: String,
    #[serde(rename = "cliOrdId", default)]
    cli_ord_id: Option<String>,
    symbol: String,
    side: String,
    #[serde(rename = "orderType")]
    order_type: String,
    #[serde(rename = "unfilledSize")]
    unfilled_size: Decimal,
    #[serde(rename = "filledSize", default)]
    filled_size: Decimal,
    #[serde(rename = "limitPrice", default)]
    limit_price: Decimal,
}

impl RawOrder {
    fn into_order_info(self) -> OrderInfo {
        OrderInfo {
            order_id: self.order_id,
            client_order_id: self.cli_ord_id.unwrap_or_default(),
            symbol: KrakenFutures::from_kraken_symbol(&self.symbol),
            side: if self.side == "buy" { OrderSide::Buy } else { OrderSide::Sell },
            order_type: map_order_type(&self.order_type),
            quantity: self.unfilled_size + self.filled_size,
            price: self.limit_price,
            status: OrderStatus::New,
            executed_qty: self.filled_size,
        }
    }
}

async fn place_order(
    adapter: &KrakenFutures,
    symbol: &str,
    side: OrderSide,
    order_type: &str,
    qty: Decimal,
    stop_price: Option<Decimal>,
    reduce_only: bool,
) -> Result<OrderInfo, AdapterError> {
    let kraken_symbol = KrakenFutures::to_kraken_symbol(symbol);
    // Kraken Futures takes an integer contract count, never a fraction.
    let contracts = qty.trunc().to_string();

    let mut fields = vec![
        format!("orderType={order_type}"),
        format!("symbol={kraken_symbol}"),
        format!("side={}", if side == OrderSide::Buy { "buy" } else { "sell" }),
        format!("size={contracts}"),
        format!("reduceOnly={reduce_only}"),
    ];
    if let Some(sp) = stop_price {
        fields.push(format!("stopPrice={sp}"));
    }
    let body = fields.join("&");

    #[derive(Deserialize)]
    struct SendStatus {
        #[serde(rename = "order_id", default)]
        order_id: Option<String>,
    }
    #[derive(Deserialize)]
    struct Result_ {
        #[serde(rename = "sendStatus")]
        send_status: SendStatus,
    }
    let result: Result_ = adapter.signed_request(reqwest::Method::POST, "/derivatives/api/v3/sendorder", &body).await?;
    let order_id = result.send_status.order_id.unwrap_or_default();

    Ok(OrderInfo {
        order_id,
        client_order_id: String::new(),
        symbol: symbol.to_string(),
        side,
        order_type: map_order_type(order_type),
        quantity: qty.trunc(),
        price: stop_price.unwrap_or(Decimal::ZERO),
        status: OrderStatus::New,
        executed_qty: Decimal::ZERO,
    })
}

fn map_order_type(s: &str) -> OrderType {
    match s {
        "mkt" | "ioc" => OrderType::Market,
        "lmt" => OrderType::Limit,
        "stp" => OrderType::StopMarket,
        "take_profit" => OrderType::TakeProfitMarket,
        _ => OrderType::Market,
    }
}
