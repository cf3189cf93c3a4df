use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
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

/// Binance USD-M futures. Canonical signing convention every other
/// HMAC-SHA256-hex exchange (Bybit, Bitget, Huobi) is a variant of.
pub struct BinanceFutures {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
    time_offset_ms: AtomicI64,
}

impl BinanceFutures {
    pub fn new(api_key: &str, api_secret: &str, testnet: bool) -> Result<Self, AdapterError> {
        let base_url = if testnet {
            "https://testnet.binancefuture.com"
        } else {
            "https://fapi.binance.com"
        }
        .to_string();

        let mut headers = HeaderMap::new();
        if !api_key.is_empty() {
            headers.insert("X-MBX-APIKEY", HeaderValue::from_str(api_key).map_err(|e| {
                AdapterError::Deserialization(format!("invalid API key header: {e}"))
            })?);
        }

        Ok(Self {
            client: reqwest::Client::builder().default_headers(headers).build()?,
            base_url,
            api_secret: api_secret.to_string(),
            time_offset_ms: AtomicI64::new(0),
        })
    }

    fn timestamp_ms(&self) -> i64 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64;
        now + self.time_offset_ms.load(Ordering::Relaxed)
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: BTreeMap<&str, String>,
    ) -> Result<T, AdapterError> {
        with_retry(path, || async {
            params.insert("timestamp", self.timestamp_ms().to_string());
            let query = serde_qs::to_string(&params).expect("BTreeMap always serializes");
            let signature = sign_hmac_sha256_hex(&self.api_secret, &query);
            let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

            let response = self.client.request(method.clone(), &url).send().await?;
            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                serde_json::from_str::<T>(&text).map_err(|e| AdapterError::Deserialization(e.to_string()))
            } else {
                Err(parse_binance_error(status.as_u16(), &text))
            }
        })
        .await
    }
}

fn parse_binance_error(status: u16, body: &str) -> AdapterError {
    #[derive(Deserialize)]
    struct Err_ {
        code: i64,
        msg: String,
    }
    let retriable = status == 429 || status >= 500;
    match serde_json::from_str::<Err_>(body) {
        Ok(e) => AdapterError::Exchange {
            code: e.code.to_string(),
            msg: e.msg,
            retriable: retriable || e.code == -1021, // timestamp outside recvWindow
        },
        Err(_) => AdapterError::Exchange {
            code: status.to_string(),
            msg: body.to_string(),
            retriable,
        },
    }
}

#[async_trait]
impl FuturesExchange for BinanceFutures {
    fn exchange_name(&self) -> &'static str {
        "BINANCE"
    }

    async fn test_connectivity(&self) -> Result<(), AdapterError> {
        #[derive(Deserialize)]
        struct ServerTime {
            #[serde(rename = "serverTime")]
            server_time: i64,
        }
        let url = format!("{}/fapi/v1/time", self.base_url);
        let resp: ServerTime = self
            .client
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;

        let local = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64;
        self.time_offset_ms.store(resp.server_time - local, Ordering::Relaxed);
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Balance {
            asset: String,
            balance: Decimal,
            available_balance: Decimal,
            cross_un_pnl: Decimal,
        }
        let balances: Vec<Balance> = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/balance", BTreeMap::new())
            .await?;
        let usdt = balances
            .into_iter()
            .find(|b| b.asset == "USDT")
            .ok_or_else(|| AdapterError::Deserialization("no USDT balance entry".to_string()))?;

        Ok(AccountInfo {
            total_wallet_balance: usdt.balance,
            available_balance: usdt.available_balance,
            used_margin: usdt.balance - usdt.available_balance,
            unrealized_pnl: usdt.cross_un_pnl,
        })
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            symbol: String,
            position_amt: Decimal,
            entry_price: Decimal,
            mark_price: Decimal,
            un_realized_profit: Decimal,
            leverage: String,
        }
        let mut params = BTreeMap::new();
        if let Some(s) = symbol {
            params.insert("symbol", s.to_string());
        }
        let raw: Vec<Raw> = self.signed_request(reqwest::Method::GET, "/fapi/v2/positionRisk", params).await?;

        Ok(raw
            .into_iter()
            .filter(|p| !p.position_amt.is_zero())
            .map(|p| {
                let side = if p.position_amt.is_sign_positive() { PositionSide::Long } else { PositionSide::Short };
                let size = p.position_amt.abs();
                let percentage = if p.entry_price.is_zero() {
                    Decimal::ZERO
                } else {
                    (p.un_realized_profit / (p.entry_price * size)) * Decimal::from(100)
                };
                Position {
                    symbol: p.symbol,
                    side,
                    size,
                    entry_price: p.entry_price,
                    mark_price: p.mark_price,
                    pnl: p.un_realized_profit,
                    percentage,
                    leverage: p.leverage.parse().ok(),
                }
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError> {
        #[derive(Deserialize)]
        struct Ticker {
            price: Decimal,
        }
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let resp: Ticker = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        Ok(resp.price)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("leverage", leverage.to_string());
        let _: Value = self.signed_request(reqwest::Method::POST, "/fapi/v1/leverage", params).await?;
        Ok(())
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        #[derive(Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<SymbolInfo>,
        }
        #[derive(Deserialize)]
        struct SymbolInfo {
            symbol: String,
            #[serde(rename = "quantityPrecision")]
            quantity_precision: u32,
            #[serde(rename = "pricePrecision")]
            price_precision: u32,
            filters: Vec<Filter>,
        }
        #[derive(Deserialize)]
        #[serde(tag = "filterType")]
        enum Filter {
            #[serde(rename = "LOT_SIZE")]
            LotSize { #[serde(rename = "stepSize")] step_size: Decimal, #[serde(rename = "minQty")] min_qty: Decimal },
            #[serde(rename = "PRICE_FILTER")]
            PriceFilter { #[serde(rename = "tickSize")] tick_size: Decimal },
            #[serde(rename = "MIN_NOTIONAL")]
            MinNotional { notional: Decimal },
            #[serde(other)]
            Other,
        }

        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let info: ExchangeInfo = self.client.get(&url).send().await?.json().await.map_err(|e| AdapterError::Deserialization(e.to_string()))?;

        let s = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| AdapterError::UnknownPrecision(symbol.to_string()))?;

        let mut step_size = Decimal::ZERO;
        let mut min_qty = Decimal::ZERO;
        let mut tick_size = Decimal::ZERO;
        let mut min_notional = Decimal::ZERO;
        for f in s.filters {
            match f {
                Filter::LotSize { step_size: s, min_qty: m } => {
                    step_size = s;
                    min_qty = m;
                }
                Filter::PriceFilter { tick_size: t } => tick_size = t,
                Filter::MinNotional { notional } => min_notional = notional,
                Filter::Other => {}
            }
        }

        Ok(SymbolPrecision {
            quantity_precision: s.quantity_precision,
            price_precision: s.price_precision,
            step_size,
            tick_size,
            min_qty,
            min_notional,
            contract_value: None,
        })
    }

    async fn round_quantity(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<Decimal, AdapterError> {
        let precision = self.get_symbol_precision(symbol).await?;
        round_quantity(symbol, qty, price, &precision)
    }

    async fn create_market_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "MARKET", qty, None, false).await
    }

    async fn create_stop_loss_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        stop_price: Decimal,
        reduce_only: bool,
    ) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "STOP_MARKET", qty, Some(stop_price), reduce_only).await
    }

    async fn create_take_profit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        stop_price: Decimal,
        reduce_only: bool,
    ) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "TAKE_PROFIT_MARKET", qty, Some(stop_price), reduce_only).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderInfo>, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            order_id: i64,
            client_order_id: String,
            symbol: String,
            side: OrderSide,
            #[serde(rename = "type")]
            order_type: String,
            orig_qty: Decimal,
            price: Decimal,
            status: String,
            executed_qty: Decimal,
        }
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        let raw: Vec<Raw> = self.signed_request(reqwest::Method::GET, "/fapi/v1/openOrders", params).await?;
        Ok(raw.into_iter().map(|r| OrderInfo {
            order_id: r.order_id.to_string(),
            client_order_id: r.client_order_id,
            symbol: r.symbol,
            side: r.side,
            order_type: map_order_type(&r.order_type),
            quantity: r.orig_qty,
            price: r.price,
            status: map_order_status(&r.status),
            executed_qty: r.executed_qty,
        }).collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());
        let _: Value = self.signed_request(reqwest::Method::DELETE, "/fapi/v1/order", params).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AdapterError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        let _: Value = self.signed_request(reqwest::Method::DELETE, "/fapi/v1/allOpenOrders", params).await?;
        Ok(())
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Kline>, AdapterError> {
        #[derive(Deserialize)]
        struct RawKline(i64, String, String, String, String, String, i64, String, i64, String, String, String);

        let url = format!("{}/fapi/v1/klines", self.base_url);
        let mut req = self.client.get(&url).query(&[
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ]);
        if let Some(s) = start {
            req = req.query(&[("startTime", s.timestamp_millis().to_string())]);
        }
        if let Some(e) = end {
            req = req.query(&[("endTime", e.timestamp_millis().to_string())]);
        }

        let raw: Vec<RawKline> = req.send().await?.json().await.map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        raw.into_iter()
            .map(|k| {
                Ok(Kline {
                    open_time: Utc.timestamp_millis_opt(k.0).single().ok_or_else(|| AdapterError::Deserialization("bad open_time".into()))?,
                    open: Decimal::from_str(&k.1).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    high: Decimal::from_str(&k.2).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    low: Decimal::from_str(&k.3).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close: Decimal::from_str(&k.4).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    volume: Decimal::from_str(&k.5).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close_time: Utc.timestamp_millis_opt(k.6).single().ok_or_else(|| AdapterError::Deserialization("bad close_time".into()))?,
                })
            })
            .collect()
    }
}

async fn place_order(
    adapter: &BinanceFutures,
    symbol: &str,
    side: OrderSide,
    order_type: &str,
    qty: Decimal,
    stop_price: Option<Decimal>,
    reduce_only: bool,
) -> Result<OrderInfo, AdapterError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Raw {
        order_id: i64,
        client_order_id: String,
        symbol: String,
        side: OrderSide,
        #[serde(rename = "type")]
        order_type: String,
        orig_qty: Decimal,
        price: Decimal,
        status: String,
        executed_qty: Decimal,
    }

    let mut params = BTreeMap::new();
    params.insert("symbol", symbol.to_string());
    params.insert("side", side.to_string());
    params.insert("type", order_type.to_string());
    params.insert("quantity", qty.to_string());
    if let Some(sp) = stop_price {
        params.insert("stopPrice", sp.to_string());
    }
    if reduce_only {
        params.insert("reduceOnly", "true".to_string());
    }

    let raw: Raw = adapter.signed_request(reqwest::Method::POST, "/fapi/v1/order", params).await?;
    Ok(OrderInfo {
        order_id: raw.order_id.to_string(),
        client_order_id: raw.client_order_id,
        symbol: raw.symbol,
        side: raw.side,
        order_type: map_order_type(&raw.order_type),
        quantity: raw.orig_qty,
        price: raw.price,
        status: map_order_status(&raw.status),
        executed_qty: raw.executed_qty,
    })
}

fn map_order_type(s: &str) -> OrderType {
    match s {
        "MARKET" => OrderType::Market,
        "LIMIT" => OrderType::Limit,
        "STOP_MARKET" => OrderType::StopMarket,
        "TAKE_PROFIT_MARKET" => OrderType::TakeProfitMarket,
        _ => OrderType::Market,
    }
}

fn map_order_status(s: &str) -> OrderStatus {
    match s {
        "NEW" => OrderStatus::New,
        "FILLED" => OrderStatus::Filled,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "CANCELED" | "EXPIRED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        _ => OrderStatus::New,
    }
}
