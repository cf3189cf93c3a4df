use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{AccountInfo, Kline, OrderInfo, OrderSide, OrderStatus, OrderType, Position, PositionSide, SymbolPrecision};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::sign_hmac_sha256_base64;
use crate::error::AdapterError;
use crate::futures::FuturesExchange;
use crate::precision::round_quantity;
use crate::retry::with_retry;

/// Bitget USDT-M futures. Signing is OKX-shaped (ACCESS-KEY/ACCESS-SIGN/
/// ACCESS-TIMESTAMP/ACCESS-PASSPHRASE headers, HMAC-SHA256 base64 over
/// `timestamp + method + path + body`) but quotes size in base asset, not
/// contracts, and tags every request with `productType=USDT-FUTURES`.
pub struct BitgetFutures {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl BitgetFutures {
    pub fn new(api_key: &str, api_secret: &str, passphrase: &str, _testnet: bool) -> Result<Self, AdapterError> {
        // Bitget has no separate demo-trading host; sandbox access is
        // granted per API key via the `paptrading` flag on the dashboard.
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: "https://api.bitget.com".to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            passphrase: passphrase.to_string(),
        })
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path_and_query: &str,
        body: Option<&Value>,
    ) -> Result<T, AdapterError> {
        with_retry(path_and_query, || async {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let body_str = body.map(|b| b.to_string()).unwrap_or_default();
            let prehash = format!("{timestamp}{}{path_and_query}{body_str}", method.as_str());
            let signature = sign_hmac_sha256_base64(&self.api_secret, &prehash);

            let mut headers = HeaderMap::new();
            headers.insert("ACCESS-KEY", HeaderValue::from_str(&self.api_key).unwrap());
            headers.insert("ACCESS-SIGN", HeaderValue::from_str(&signature).unwrap());
            headers.insert("ACCESS-TIMESTAMP", HeaderValue::from_str(&timestamp).unwrap());
            headers.insert("ACCESS-PASSPHRASE", HeaderValue::from_str(&self.passphrase).unwrap());
            headers.insert("Content-Type", HeaderValue::from_static("application/json"));

            let url = format!("{}{}", self.base_url, path_and_query);
            let mut request = self.client.request(method.clone(), &url).headers(headers);
            if let Some(b) = body {
                request = request.body(b.to_string());
            }

            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;

            #[derive(Deserialize)]
            struct Envelope<T> {
                code: String,
                msg: String,
                data: Option<T>,
            }

            if !status.is_success() {
                return Err(AdapterError::Exchange { code: status.to_string(), msg: text, retriable: status.as_u16() == 429 || status.as_u16() >= 500 });
            }

            let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| AdapterError::Deserialization(format!("{e}: {text}")))?;
            if envelope.code == "00000" {
                envelope.data.ok_or_else(|| AdapterError::Deserialization("missing data field".to_string()))
            } else {
                Err(AdapterError::Exchange { code: envelope.code.clone(), msg: envelope.msg, retriable: envelope.code == "429000" })
            }
        })
        .await
    }
}

#[async_trait]
impl FuturesExchange for BitgetFutures {
    fn exchange_name(&self) -> &'static str {
        "BITGET"
    }

    async fn test_connectivity(&self) -> Result<(), AdapterError> {
        let url = format!("{}/api/v2/public/time", self.base_url);
        self.client.get(&url).send().await?;
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            usdt_equity: Decimal,
            available: Decimal,
            locked: Decimal,
            unrealized_pl: Decimal,
        }
        let path = "/api/v2/mix/account/account?symbol=BTCUSDT&marginCoin=USDT&productType=USDT-FUTURES";
        let raw: Raw = self.signed_request(reqwest::Method::GET, path, None).await?;

        Ok(AccountInfo {
            total_wallet_balance: raw.usdt_equity,
            available_balance: raw.available,
            used_margin: raw.locked,
            unrealized_pnl: raw.unrealized_pl,
        })
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            symbol: String,
            hold_side: String,
            total: Decimal,
            open_price_avg: Decimal,
            mark_price: Decimal,
            unrealized_pl: Decimal,
            leverage: String,
        }
        let mut path = "/api/v2/mix/position/all-position?productType=USDT-FUTURES&marginCoin=USDT".to_string();
        if let Some(s) = symbol {
            path.push_str(&format!("&symbol={s}"));
        }
        let raw: Vec<Raw> = self.signed_request(reqwest::Method::GET, &path, None).await?;

        Ok(raw
            .into_iter()
            .filter(|p| !p.total.is_zero())
            .map(|p| {
                let percentage = if p.open_price_avg.is_zero() {
                    Decimal::ZERO
                } else {
                    (p.unrealized_pl / (p.open_price_avg * p.total)) * Decimal::from(100)
                };
                Position {
                    symbol: p.symbol,
                    side: if p.hold_side == "long" { PositionSide::Long } else { PositionSide::Short },
                    size: p.total,
                    entry_price: p.open_price_avg,
                    mark_price: p.mark_price,
                    pnl: p.unrealized_pl,
                    percentage,
                    leverage: p.leverage.parse().ok(),
                }
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "lastPr")]
            last_pr: Decimal,
        }
        let url = format!("{}/api/v2/mix/market/ticker", self.base_url);
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<Raw>,
        }
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("productType", "USDT-FUTURES")])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        envelope.data.into_iter().next().map(|r| r.last_pr).ok_or_else(|| AdapterError::Deserialization(format!("no ticker for {symbol}")))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterError> {
        for hold_side in ["long", "short"] {
            let body = serde_json::json!({
                "symbol": symbol,
                "productType": "USDT-FUTURES",
                "marginCoin": "USDT",
                "leverage": leverage.to_string(),
                "holdSide": hold_side,
            });
            let _: Value = self.signed_request(reqwest::Method::POST, "/api/v2/mix/account/set-leverage", Some(&body)).await?;
        }
        Ok(())
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            #[serde(rename = "volumePlace")]
            volume_place: u32,
            #[serde(rename = "pricePlace")]
            price_place: u32,
            #[serde(rename = "minTradeNum")]
            min_trade_num: Decimal,
            #[serde(rename = "minTradeUSDT")]
            min_trade_usdt: Decimal,
        }
        let url = format!("{}/api/v2/mix/market/contracts", self.base_url);
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<Raw>,
        }
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("productType", "USDT-FUTURES")])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        let raw = envelope.data.into_iter().next().ok_or_else(|| AdapterError::UnknownPrecision(symbol.to_string()))?;

        let step_size = Decimal::new(1, raw.volume_place);
        Ok(SymbolPrecision {
            quantity_precision: raw.volume_place,
            price_precision: raw.price_place,
            step_size,
            tick_size: Decimal::new(1, raw.price_place),
            min_qty: raw.min_trade_num,
            min_notional: raw.min_trade_usdt,
            contract_value: None,
        })
    }

    async fn round_quantity(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<Decimal, AdapterError> {
        let precision = self.get_symbol_precision(symbol).await?;
        round_quantity(symbol, qty, price, &precision)
    }

    async fn create_market_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "market", qty, None, false).await
    }

    async fn create_stop_loss_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_plan_order(self, symbol, side, "loss_plan", qty, stop_price, reduce_only).await
    }

    async fn create_take_profit_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_plan_order(self, symbol, side, "profit_plan", qty, stop_price, reduce_only).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderInfo>, AdapterError> {
        let path = format!("/api/v2/mix/order/orders-pending?symbol={symbol}&productType=USDT-FUTURES");
        #[derive(Deserialize)]
        struct Result_ {
            #[serde(rename = "entrustedList", default)]
            entrusted_list: Vec<RawOrder>,
        }
        let result: Result_ = self.signed_request(reqwest::Method::GET, &path, None).await?;
        Ok(result.entrusted_list.into_iter().map(RawOrder::into_order_info).collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({"symbol": symbol, "productType": "USDT-FUTURES", "orderId": order_id});
        let _: Value = self.signed_request(reqwest::Method::POST, "/api/v2/mix/order/cancel-order", Some(&body)).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({"symbol": symbol, "productType": "USDT-FUTURES"});
        let _: Value = self.signed_request(reqwest::Method::POST, "/api/v2/mix/order/cancel-symbol-orders", Some(&body)).await?;
        Ok(())
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Vec<Kline>, AdapterError> {
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<[String; 7]>,
        }
        let url = format!("{}/api/v2/mix/market/candles", self.base_url);
        let mut req = self.client.get(&url).query(&[
            ("symbol", symbol.to_string()),
            ("productType", "USDT-FUTURES".to_string()),
            ("granularity", interval.to_string()),
            ("limit", limit.to_string()),
        ]);
        if let Some(s) = start {
            req = req.query(&[("startTime", s.timestamp_millis().to_string())]);
        }
        if let Some(e) = end {
            req = req.query(&[("endTime", e.timestamp_millis().to_string())]);
        }
        let envelope: Envelope = req.send().await?.json().await.map_err(|e| AdapterError::Deserialization(e.to_string()))?;

        envelope
            .data
            .into_iter()
            .map(|row| {
                let ts: i64 = row[0].parse().map_err(|_| AdapterError::Deserialization("bad candle ts".into()))?;
                Ok(Kline {
                    open_time: Utc.timestamp_millis_opt(ts).single().ok_or_else(|| AdapterError::Deserialization("bad ts".into()))?,
                    open: Decimal::from_str(&row[1]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    high: Decimal::from_str(&row[2]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    low: Decimal::from_str(&row[3]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close: Decimal::from_str(&row[4]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    volume: Decimal::from_str(&row[5]).map_err(|e| AdapterError::Deserialization(e.to_string()))?,
                    close_time: Utc.timestamp_millis_opt(ts).single().unwrap(),
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: String,
    #[serde(rename = "clientOid", default)]
    client_oid: String,
    symbol: String,
    side: String,
    order_type: String,
    size: Decimal,
    price: Decimal,
    state: String,
    #[serde(rename = "baseVolume", default)]
    base_volume: Decimal,
}

impl RawOrder {
    fn into_order_info(self) -> OrderInfo {
        OrderInfo {
            order_id: self.order_id,
            client_order_id: self.client_oid,
            symbol: self.symbol,
            side: if self.side.starts_with("buy") { OrderSide::Buy } else { OrderSide::Sell },
            order_type: map_order_type(&self.order_type),
            quantity: self.size,
            price: self.price,
            status: map_order_status(&self.state),
            executed_qty: self.base_volume,
        }
    }
}

async fn place_order(adapter: &BitgetFutures, symbol: &str, side: OrderSide, order_type: &str, qty: Decimal, stop_price: Option<Decimal>, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
    let mut body = serde_json::json!({
        "symbol": symbol,
        "productType": "USDT-FUTURES",
        "marginCoin": "USDT",
        "marginMode": "crossed",
        "side": if side == OrderSide::Buy { "buy" } else { "sell" },
        "orderType": order_type,
        "size": qty.to_string(),
        "reduceOnly": if reduce_only { "YES" } else { "NO" },
    });
    if let Some(sp) = stop_price {
        body["presetStopSurplusPrice"] = Value::String(sp.to_string());
    }
    let raw: RawOrder = adapter.signed_request(reqwest::Method::POST, "/api/v2/mix/order/place-order", Some(&body)).await?;
    Ok(raw.into_order_info())
}

async fn place_plan_order(adapter: &BitgetFutures, symbol: &str, side: OrderSide, plan_type: &str, qty: Decimal, trigger_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
    let body = serde_json::json!({
        "symbol": symbol,
        "productType": "USDT-FUTURES",
        "marginCoin": "USDT",
        "planType": plan_type,
        "side": if side == OrderSide::Buy { "buy" } else { "sell" },
        "triggerPrice": trigger_price.to_string(),
        "triggerType": "mark_price",
        "size": qty.to_string(),
        "reduceOnly": if reduce_only { "YES" } else { "NO" },
        "orderType": "market",
    });
    let raw: RawOrder = adapter.signed_request(reqwest::Method::POST, "/api/v2/mix/order/place-plan-order", Some(&body)).await?;
    Ok(raw.into_order_info())
}

fn map_order_type(s: &str) -> OrderType {
    match s {
        "market" => OrderType::Market,
        "limit" => OrderType::Limit,
        "loss_plan" => OrderType::StopMarket,
        "profit_plan" => OrderType::TakeProfitMarket,
        _ => OrderType::Market,
    }
}

fn map_order_status(s: &str) -> OrderStatus {
    match s {
        "live" | "new" => OrderStatus::New,
        "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "canceled" => OrderStatus::Canceled,
        _ => OrderStatus::New,
    }
}
