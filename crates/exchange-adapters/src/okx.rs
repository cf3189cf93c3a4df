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
use crate::precision::quantity_to_contracts;
use crate::retry::with_retry;

/// OKX USDT-margined perpetual swaps. Signs with HMAC-SHA256 base64 (not
/// hex), quotes size in contracts rather than base asset, and requires
/// leverage to be set twice (long and short) in long/short position mode.
pub struct OkxFutures {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    passphrase: String,
    demo_trading: bool,
}

impl OkxFutures {
    pub fn new(api_key: &str, api_secret: &str, passphrase: &str, testnet: bool) -> Result<Self, AdapterError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: "https://www.okx.com".to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            passphrase: passphrase.to_string(),
            demo_trading: testnet,
        })
    }

    fn to_okx_symbol(&self, symbol: &str) -> String {
        let base = symbol.replace('/', "").to_uppercase();
        if let Some(stripped) = base.strip_suffix("USDT") {
            format!("{stripped}-USDT-SWAP")
        } else {
            base
        }
    }

    fn from_okx_symbol(symbol: &str) -> String {
        symbol.replace("-SWAP", "").replace('-', "")
    }

    /// Account-wide position mode (§8): `long_short_mode` orders carry
    /// `posSide`, `net_mode` orders don't. Queried fresh each call, matching
    /// this adapter's no-caching precision lookups.
    async fn get_pos_mode(&self) -> Result<String, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            pos_mode: String,
        }
        let raw: Vec<Raw> = self.signed_request(reqwest::Method::GET, "/api/v5/account/config", None).await?;
        Ok(raw.into_iter().next().map(|r| r.pos_mode).unwrap_or_else(|| "long_short_mode".to_string()))
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, AdapterError> {
        with_retry(path, || async {
            let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
            let body_str = body.map(|b| b.to_string()).unwrap_or_default();
            let prehash = format!("{timestamp}{}{path}{body_str}", method.as_str());
            let signature = sign_hmac_sha256_base64(&self.api_secret, &prehash);

            let mut headers = HeaderMap::new();
            headers.insert("OK-ACCESS-KEY", HeaderValue::from_str(&self.api_key).unwrap());
            headers.insert("OK-ACCESS-SIGN", HeaderValue::from_str(&signature).unwrap());
            headers.insert("OK-ACCESS-TIMESTAMP", HeaderValue::from_str(&timestamp).unwrap());
            headers.insert("OK-ACCESS-PASSPHRASE", HeaderValue::from_str(&self.passphrase).unwrap());
            headers.insert("Content-Type", HeaderValue::from_static("application/json"));
            if self.demo_trading {
                headers.insert("x-simulated-trading", HeaderValue::from_static("1"));
            }

            let url = format!("{}{}", self.base_url, path);
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
            if envelope.code == "0" {
                envelope.data.ok_or_else(|| AdapterError::Deserialization("missing data field".to_string()))
            } else {
                Err(AdapterError::Exchange { code: envelope.code.clone(), msg: envelope.msg, retriable: envelope.code == "50011" })
            }
        })
        .await
    }
}

#[async_trait]
impl FuturesExchange for OkxFutures {
    fn exchange_name(&self) -> &'static str {
        "OKX"
    }

    async fn test_connectivity(&self) -> Result<(), AdapterError> {
        let url = format!("{}/api/v5/public/time", self.base_url);
        self.client.get(&url).send().await?;
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            total_eq: Decimal,
            details: Vec<Detail>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Detail {
            ccy: String,
            avail_bal: Decimal,
            eq: Decimal,
            frozen_bal: Decimal,
        }
        let raw: Vec<Raw> = self.signed_request(reqwest::Method::GET, "/api/v5/account/balance", None).await?;
        let account = raw.into_iter().next().ok_or_else(|| AdapterError::Deserialization("empty balance data".to_string()))?;
        let usdt = account.details.iter().find(|d| d.ccy == "USDT").ok_or_else(|| AdapterError::Deserialization("no USDT balance detail".to_string()))?;

        Ok(AccountInfo {
            total_wallet_balance: account.total_eq,
            available_balance: usdt.avail_bal,
            used_margin: usdt.eq - usdt.avail_bal,
            // OKX reports unrealized P&L per-position, not on the balance endpoint;
            // callers that need it aggregate `get_positions`.
            unrealized_pnl: Decimal::ZERO,
        })
    }

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            inst_id: String,
            pos_side: String,
            pos: Decimal,
            avg_px: Decimal,
            mark_px: Decimal,
            upl: Decimal,
            upl_ratio: Decimal,
            lever: String,
        }
        let mut params = BTreeMap::new();
        params.insert("instType", "SWAP".to_string());
        if let Some(s) = symbol {
            params.insert("instId", self.to_okx_symbol(s));
        }
        let query = serde_qs::to_string(&params).unwrap();
        let path = format!("/api/v5/account/positions?{query}");
        let raw: Vec<Raw> = self.signed_request(reqwest::Method::GET, &path, None).await?;

        Ok(raw
            .into_iter()
            .filter(|p| !p.pos.is_zero())
            .map(|p| Position {
                symbol: Self::from_okx_symbol(&p.inst_id),
                side: if p.pos_side == "long" { PositionSide::Long } else { PositionSide::Short },
                size: p.pos.abs(),
                entry_price: p.avg_px,
                mark_price: p.mark_px,
                pnl: p.upl,
                percentage: p.upl_ratio * Decimal::from(100),
                leverage: p.lever.parse().ok(),
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError> {
        #[derive(Deserialize)]
        struct Raw {
            last: Decimal,
        }
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<Raw>,
        }
        let url = format!("{}/api/v5/market/ticker", self.base_url);
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("instId", self.to_okx_symbol(symbol))])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        envelope.data.into_iter().next().map(|r| r.last).ok_or_else(|| AdapterError::Deserialization(format!("no ticker for {symbol}")))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterError> {
        let inst_id = self.to_okx_symbol(symbol);
        let pos_mode = self.get_pos_mode().await?;
        // Long/short mode requires setting both sides; OKX tolerates
        // "leverage not modified" as a benign no-op on the second call.
        // net_mode has no side distinction, so a single call suffices.
        let pos_sides: &[Option<&str>] = if pos_mode == "long_short_mode" { &[Some("long"), Some("short")] } else { &[None] };
        for pos_side in pos_sides {
            let mut body = serde_json::json!({
                "instId": inst_id,
                "lever": leverage.to_string(),
                "mgnMode": "cross",
            });
            if let Some(side) = pos_side {
                body["posSide"] = Value::String(side.to_string());
            }
            match self.signed_request::<Value>(reqwest::Method::POST, "/api/v5/account/set-leverage", Some(&body)).await {
                Ok(_) => {}
                Err(AdapterError::Exchange { msg, .. }) if msg.to_lowercase().contains("not modified") => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            ct_val: Decimal,
            lot_sz: Decimal,
            min_sz: Decimal,
            tick_sz: Decimal,
        }
        let url = format!("{}/api/v5/public/instruments", self.base_url);
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<Raw>,
        }
        let envelope: Envelope = self
            .client
            .get(&url)
            .query(&[("instType", "SWAP"), ("instId", &self.to_okx_symbol(symbol))])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::Deserialization(e.to_string()))?;
        let raw = envelope.data.into_iter().next().ok_or_else(|| AdapterError::UnknownPrecision(symbol.to_string()))?;

        Ok(SymbolPrecision {
            quantity_precision: raw.lot_sz.scale(),
            price_precision: raw.tick_sz.scale(),
            step_size: raw.lot_sz,
            tick_size: raw.tick_sz,
            min_qty: raw.min_sz,
            min_notional: Decimal::from(5),
            contract_value: Some(raw.ct_val),
        })
    }

    async fn round_quantity(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<Decimal, AdapterError> {
        let precision = self.get_symbol_precision(symbol).await?;
        quantity_to_contracts(symbol, qty, price, &precision)
    }

    async fn create_market_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "market", qty, None, false, true).await
    }

    async fn create_stop_loss_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "conditional", qty, Some(stop_price), reduce_only, false).await
    }

    async fn create_take_profit_order(&self, symbol: &str, side: OrderSide, qty: Decimal, stop_price: Decimal, reduce_only: bool) -> Result<OrderInfo, AdapterError> {
        place_order(self, symbol, side, "conditional", qty, Some(stop_price), reduce_only, false).await
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderInfo>, AdapterError> {
        let inst_id = self.to_okx_symbol(symbol);
        let path = format!("/api/v5/trade/orders-pending?instType=SWAP&instId={inst_id}");
        let raw: Vec<RawOrder> = self.signed_request(reqwest::Method::GET, &path, None).await?;
        Ok(raw.into_iter().map(RawOrder::into_order_info).collect())
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({"instId": self.to_okx_symbol(symbol), "ordId": order_id});
        let _: Vec<Value> = self.signed_request(reqwest::Method::POST, "/api/v5/trade/cancel-order", Some(&body)).await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AdapterError> {
        let open = self.get_open_orders(symbol).await?;
        for order in open {
            let _ = self.cancel_order(symbol, &order.order_id).await;
        }
        Ok(())
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Vec<Kline>, AdapterError> {
        #[derive(Deserialize)]
        struct Envelope {
            data: Vec<[String; 9]>,
        }
        let url = format!("{}/api/v5/market/candles", self.base_url);
        let mut req = self.client.get(&url).query(&[
            ("instId", self.to_okx_symbol(symbol)),
            ("bar", interval.to_string()),
            ("limit", limit.to_string()),
        ]);
        // OKX's `after`/`before` semantics are reversed from Binance's start/end.
        if let Some(e) = end {
            req = req.query(&[("before", e.timestamp_millis().to_string())]);
        }
        if let Some(s) = start {
            req = req.query(&[("after", s.timestamp_millis().to_string())]);
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

    fn normalize_symbol(&self, symbol: &str) -> String {
        self.to_okx_symbol(symbol)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    ord_id: String,
    cl_ord_id: String,
    inst_id: String,
    side: String,
    ord_type: String,
    sz: Decimal,
    px: Decimal,
    state: String,
    acc_fill_sz: Decimal,
}

impl RawOrder {
    fn into_order_info(self) -> OrderInfo {
        OrderInfo {
            order_id: self.ord_id,
            client_order_id: self.cl_ord_id,
            symbol: OkxFutures::from_okx_symbol(&self.inst_id),
            side: if self.side == "buy" { OrderSide::Buy } else { OrderSide::Sell },
            order_type: map_order_type(&self.ord_type),
            quantity: self.sz,
            price: self.px,
            status: map_order_status(&self.state),
            executed_qty: self.acc_fill_sz,
        }
    }
}

async fn place_order(
    adapter: &OkxFutures,
    symbol: &str,
    side: OrderSide,
    ord_type: &str,
    qty: Decimal,
    trigger_price: Option<Decimal>,
    reduce_only: bool,
    opening: bool,
) -> Result<OrderInfo, AdapterError> {
    let mut body = serde_json::json!({
        "instId": adapter.to_okx_symbol(symbol),
        "tdMode": "cross",
        "side": if side == OrderSide::Buy { "buy" } else { "sell" },
        "ordType": ord_type,
        "sz": qty.to_string(),
        "reduceOnly": reduce_only,
    });

    // posSide only applies in long_short_mode (§8); net_mode orders omit it
    // entirely and rely on `side` + `reduceOnly` to disambiguate direction.
    if adapter.get_pos_mode().await? == "long_short_mode" {
        // Opening follows the order's own side; closing (SL/TP) uses the
        // position side being reduced, which is the opposite of this order's side.
        let pos_side = if opening {
            if side == OrderSide::Buy { "long" } else { "short" }
        } else if side == OrderSide::Sell {
            "long"
        } else {
            "short"
        };
        body["posSide"] = Value::String(pos_side.to_string());
    }
    if let Some(tp) = trigger_price {
        body["triggerPx"] = Value::String(tp.to_string());
        body["orderPx"] = Value::String("-1".to_string()); // market execution once triggered
    }

    let path = if trigger_price.is_some() { "/api/v5/trade/order-algo" } else { "/api/v5/trade/order" };
    let raw: Vec<RawOrder> = adapter.signed_request(reqwest::Method::POST, path, Some(&body)).await?;
    raw.into_iter().next().map(RawOrder::into_order_info).ok_or_else(|| AdapterError::Deserialization("empty order response".to_string()))
}

fn map_order_type(s: &str) -> OrderType {
    match s {
        "market" => OrderType::Market,
        "limit" => OrderType::Limit,
        "conditional" => OrderType::StopMarket,
        _ => OrderType::Market,
    }
}

fn map_order_status(s: &str) -> OrderStatus {
    match s {
        "live" => OrderStatus::New,
        "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "canceled" => OrderStatus::Canceled,
        _ => OrderStatus::New,
    }
}
