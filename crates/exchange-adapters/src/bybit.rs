use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{AccountInfo, Kline, OrderInfo, OrderSide, OrderStatus, OrderType, Position, PositionSide, SymbolPrecision};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::sign_hmac_sha256_hex;
use crate::error::AdapterError;
use crate::futures::FuturesExchange;
use crate::precision::round_quantity;
use crate::retry::with_retry;

const RECV_WINDOW: &str = "5000";

/// Bybit V5 unified-account linear perpetuals. Signing embeds `recv_window`
/// into the signed string (`timestamp + api_key + recv_window + params`),
/// unlike Binance's plain query-string signing.
pub struct BybitFutures {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BybitFutures {
    pub fn new(api_key: &str, api_secret: &str, testnet: bool) -> Result<Self, AdapterError> {
        let base_url = if testnet { "https://api-testnet.bybit.com" } else { "https://api.bybit.com" }.to_string();
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(&self, path: &str, params: &BTreeMap<&str, String>) -> Result<T, AdapterError> {
        let query = serde_qs::to_string(params).expect("BTreeMap always serializes");
        with_retry(path, || self.signed_request(reqwest::Method::GET, path, &query)).await
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> Result<T, AdapterError> {
        let body_str = serde_json::to_string(body).expect("Value always serializes");
        with_retry(path, || self.signed_request(reqwest::Method::POST, path, &body_str)).await
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(&self, method: reqwest::Method, path: &str, payload: &str) -> Result<T, AdapterError> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis().to_string();
        let signed_str = format!("{timestamp}{}{RECV_WINDOW}{payload}", self.api_key);
        let signature = sign_hmac_sha256_hex(&self.api_secret, &signed_str);

        let mut headers = HeaderMap::new();
        headers.insert("X-BAPI-API-KEY", HeaderValue::from_str(&self.api_key).unwrap());
        headers.insert("X-BAPI-TIMESTAMP", HeaderValue::from_str(&timestamp).unwrap());
        headers.insert("X-BAPI-RECV-WINDOW", HeaderValue::from_static(RECV_WINDOW));
        headers.insert("X-BAPI-SIGN", HeaderValue::from_str(&signature).unwrap());

        let url = format!("{}{}", self.base_url, path);
        let request = match method {
            reqwest::Method::GET => self.client.get(&format!("{url}?{payload}")).headers(headers),
            _ => self.client.post(&url).headers(headers).header("Content-Type", "application/json").body(payload.to_string()),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        #[derive(Deserialize)]
        struct Envelope<T> {
            #[serde(rename = "retCode")]
            ret_code: i64,
            #[serde(rename = "retMsg")]
            ret_msg: String,
            result: Option<T>,
        }

        if !status.is_success() {
            return Err(AdapterError::Exchange { code: status.to_string(), msg: text, retriable: status.as_u16() == 429 || status.as_u16() >= 500 });
        }

        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| AdapterError::Deserialization(format!("{e}: {text}")))?;
        if envelope.ret_code == 0 {
            envelope.result.ok_or_else(|| AdapterError::Deserialization("missing result field".to_string()))
        } else if envelope.ret_msg.to_lowercase().contains("leverage not modified") {
            // Treated as success by the caller; surface a sentinel the leverage method special-cases.
            Err(AdapterError::Exchange { code: envelope.ret_code.to_string(), msg: envelope.ret_msg, retriable: false })
        } else {
            let retriable = envelope.ret_code == 10006 || envelope.ret_msg.to_lowercase().contains("too many");
            Err(AdapterError::Exchange { code: envelope.ret_code.to_string(), msg: envelope.ret_msg, retriable })
        }
    }
}

#[async_trait]
impl FuturesExchange for BybitFutures {
    fn exchange_name(&self) -> &'static str {
        "BYBIT"
    }

    async fn test_connectivity(&self) -> Result<(), AdapterError> {
        let url = format!("{}/v5/market/time", self.base_url);
        self.client.get(&url).send().await?;
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            list: Vec<AccountEntry>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AccountEntry {
            total_equity: Decimal,
            total_available_balance: Decimal,
            total_margin_balance: Decimal,
            total_perp_upl: Decimal,
        }
        let mut params = BTreeMap::new();
        params.insert("accountType", "UNIFIED".to_string());
        let result: Result_ = self.signed_get("/v5/account/wallet-balance", &params).await?;
        let acct = result.list.into_iter().next().ok_or_else(|| AdapterError::Deserialization("empty wallet-balance list".to_string()))?;

        Ok(AccountInfo {
            total_wallet_balance: acct.total_equity,
            available_balance: acct.total_available_balance,
            used_margin: acct.total_equity - acct.total_margin_balance,
            unrealized_pnl: acct.total_perp_upl,
        })
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            list: Vec<Raw>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            symbol: String,
            side: String,
            size: Decimal,
            avg_price: Decimal,
            mark_price: Decimal,
            unrealised_pnl: Decimal,
            leverage: String,
        }
        let mut params = BTreeMap::new();
        params.insert("category", "linear".to_string());
        params.insert("settleCoin", "USDT".to_string());
        if let Some(s) = symbol {
            params.insert("symbol", s.to_string());
        }
        let result: Result_ = self.signed_get("/v5/position/list", &params).await?;

        Ok(result
            .list
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .map(|p| {
                let percentage = if p.avg_price.is_zero() {
                    Decimal::ZERO
                } else {
                    (p.unrealised_pnl / (p.avg_price * p.size)) * Decimal::from(100)
                };
                Position {
                    symbol: p.symbol,
                    side: if p.side == "Buy" { PositionSide::Long } else { PositionSide::Short },
                    size: p.size,
                    entry_price: p.avg_price,
                    mark_price: p.mark_price,
                    pnl: p.unrealised_pnl,
                    percentage,
                    leverage: p.leverage.parse().ok(),
                }
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            list: Vec<Raw>,
        }
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "lastPrice")]
            last_price: Decimal,
        }
        let url = format!("{}/v5/market/tickers", self.base_url);
        #[derive(Deserialize)]
        struct Envelope {
            result: Result_,
        }
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("category", "linear"), ("symbol", symbol)])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        envelope
            .result
            .list
            .into_iter()
            .next()
            .map(|r| r.last_price)
            .ok_or_else(|| AdapterError::Deserialization(format!("no ticker for {symbol}")))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterError> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        match self.signed_post::<Value>("/v5/position/set-leverage", &body).await {
            Ok(_) => Ok(()),
            Err(AdapterError::Exchange { msg, .. }) if msg.to_lowercase().contains("leverage not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            list: Vec<Raw>,
        }
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "lotSizeFilter")]
            lot_size_filter: LotSize,
            #[serde(rename = "priceFilter")]
            price_filter: PriceFilter,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct LotSize {
            qty_step: Decimal,
            min_order_qty: Decimal,
            #[serde(default)]
            min_notional_value: Option<Decimal>,
        }
        #[derive(Deserialize)]
        struct PriceFilter {
            #[serde(rename = "tickSize")]
            tick_size: Decimal,
        }
        #[derive(Deserialize)]
        struct Envelope {
            result: Result_,
        }

        let url = format!("{}/v5/market/instruments-info", self.base_url);
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("category", "linear"), ("symbol", symbol)])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;

        let raw = envelope.result.list.into_iter().next().ok_or_else(|| AdapterError::UnknownPrecision(symbol.to_string()))?;
        let step_size = raw.lot_size_filter.qty_step;

        Ok(SymbolPrecision {
            quantity_precision: step_size.scale(),
            price_precision: raw.price_filter.tick_size.scale(),
            step_size,
            tick_size: raw.price_filter.tick_size,
            min_qty: raw.lot_size_filter.min_order_qty,
            min_notional: raw.lot_size_filter.min_notional_value.unwrap_or(Decimal::from(5)),
            contract_value: None,
        })
    }

    async fn round_quantity(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<Decimal, AdapterError> {
        let precision = self.get_symbol_precision(symbol).await?;
        round_quantity(symbol, qty, price, &precision)
    }

    async fn create_market_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "Market", qty, None, false).await
    }

    async fn create_stop_loss_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "StopMarket", qty, Some(stop_price), reduce_only).await
    }

    async fn create_take_profit_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "TakeProfitMarket", qty, Some(stop_price), reduce_only).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderInfo>, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            list: Vec<RawOrder>,
        }
        let mut params = BTreeMap::new();
        params.insert("category", "linear".to_string());
        params.insert("symbol", symbol.to_string());
        let result: Result_ = self.signed_get("/v5/order/realtime", &params).await?;
        Ok(result.list.into_iter().map(RawOrder::into_order_info).collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({"category": "linear", "symbol": symbol, "orderId": order_id});
        let _: Value = self.signed_post("/v5/order/cancel", &body).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({"category": "linear", "symbol": symbol});
        let _: Value = self.signed_post("/v5/order/cancel-all", &body).await?;
        Ok(())
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Vec<Kline>, AdapterError> {
        #[derive(Deserialize)]
        struct Result_ {
            list: Vec<[String; 7]>,
        }
        #[derive(Deserialize)]
        struct Envelope {
            result: Result_,
        }
        let url = format!("{}/v5/market/kline", self.base_url);
        let mut req = self.client.get(&url).query(&[
            ("category", "linear".to_string()),
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ]);
        if let Some(s) = start {
            req = req.query(&[("start", s.timestamp_millis().to_string())]);
        }
        if let Some(e) = end {
            req = req.query(&[("end", e.timestamp_millis().to_string())]);
        }
        let envelope: Envelope = req.send().await?.json().await.map_err(|e| AdapterError::Deserialization(e.to_string()))?;

        envelope
            .result
            .list
            .into_iter()
            .map(|row| {
                let open_ms: i64 = row[0].parse().map_err(|_| AdapterError::Deserialization("bad open time".into()))?;
                Ok(Kline {
                    open_time: Utc.timestamp_millis_opt(open_ms).single().ok_or_else(|| AdapterError::Deserialization("bad open time".into()))?,
                    open: Decimal::from_str(&row[1]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    high: Decimal::from_str(&row[2]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    low: Decimal::from_str(&row[3]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close: Decimal::from_str(&row[4]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    volume: Decimal::from_str(&row[5]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close_time: Utc.timestamp_millis_opt(open_ms).single().unwrap(),
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: String,
    order_link_id: String,
    symbol: String,
    side: String,
    order_type: String,
    qty: Decimal,
    price: Decimal,
    order_status: String,
    cum_exec_qty: Decimal,
}

impl RawOrder {
    fn into_order_info(self) -> OrderInfo {
        OrderInfo {
            order_id: self.order_id,
            client_order_id: self.order_link_id,
            symbol: self.symbol,
            side: if self.side == "Buy" { OrderSide::Buy } else { OrderSide::Sell },
            order_type: map_order_type(&self.order_type),
            quantity: self.qty,
            price: self.price,
            status: map_order_status(&self.order_status),
            executed_qty: self.cum_exec_qty,
        }
    }
}

async fn place_order(adapter: &BybitFutures, symbol: &str, side: OrderSide, order_type: &str, qty: Decimal, stop_price: Option<Decimal>, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
    let mut body = serde_json::json!({
        "category": "linear",
        "symbol": symbol,
        "side": if side == OrderSide::Buy { "Buy" } else { "Sell" },
        // Conditional (SL/TP) orders on Bybit V5 are still orderType "Market";
        // the trigger is what makes them conditional.
        "orderType": "Market",
        "qty": qty.to_string(),
        "reduceOnly": reduce_only,
    });
    if let Some(sp) = stop_price {
        body["triggerPrice"] = Value::String(sp.to_string());
        // triggerDirection: 1 = rises to trigger, 2 = falls to trigger.
        let rises_to_trigger = if order_type == "StopMarket" { side == OrderSide::Buy } else { side == OrderSide::Sell };
        body["triggerDirection"] = Value::from(if rises_to_trigger { 1 } else { 2 });
    }

    let raw: RawOrder = adapter.signed_post("/v5/order/create", &body).await?;
    Ok(raw.into_order_info())
}

fn map_order_type(s: &str) -> OrderType {
    match s {
        "Market" => OrderType::Market,
        "Limit" => OrderType::Limit,
        "StopMarket" => OrderType::StopMarket,
        "TakeProfitMarket" => OrderType::TakeProfitMarket,
        _ => OrderType::Market,
    }
}

fn map_order_status(s: &str) -> OrderStatus {
    match s {
        "New" | "Untriggered" => OrderStatus::New,
        "Filled" => OrderStatus::Filled,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Cancelled" | "Deactivated" => OrderStatus::Canceled,
        "Rejected" => OrderStatus::Rejected,
        _ => OrderStatus::New,
    }
}
