use core_types::{ExchangeCredentials, ExchangeKind, NetworkType};

use crate::binance::BinanceFutures;
use crate::bitget::BitgetFutures;
use crate::bybit::BybitFutures;
use crate::error::AdapterError;
use crate::futures::FuturesExchange;
use crate::huobi::HuobiFutures;
use crate::kraken::KrakenFutures;
use crate::okx::OkxFutures;

/// Builds the concrete futures adapter for a stored credential row. Mirrors
/// a lookup-table registry rather than a generic plugin system: each
/// exchange's constructor takes a fixed argument shape (key/secret, or
/// key/secret/passphrase), so there is no uniform `new(credentials)` to
/// dispatch through without first matching on `exchange`.
pub fn build_futures_exchange(credentials: &ExchangeCredentials) -> Result<Box<dyn FuturesExchange>, AdapterError> {
    let testnet = credentials.network == NetworkType::Testnet;

    match credentials.exchange {
        ExchangeKind::Binance => Ok(Box::new(BinanceFutures::new(&credentials.api_key, &credentials.api_secret, testnet)?)),
        ExchangeKind::Bybit => Ok(Box::new(BybitFutures::new(&credentials.api_key, &credentials.api_secret, testnet)?)),
        ExchangeKind::Okx => {
            let passphrase = credentials
                .api_passphrase
                .as_deref()
                .ok_or(AdapterError::Unsupported("OKX requires an API passphrase"))?;
            Ok(Box::new(OkxFutures::new(&credentials.api_key, &credentials.api_secret, passphrase, testnet)?))
        }
        ExchangeKind::Bitget => {
            let passphrase = credentials
                .api_passphrase
                .as_deref()
                .ok_or(AdapterError::Unsupported("Bitget requires an API passphrase"))?;
            Ok(Box::new(BitgetFutures::new(&credentials.api_key, &credentials.api_secret, passphrase, testnet)?))
        }
        ExchangeKind::Huobi => Ok(Box::new(HuobiFutures::new(&credentials.api_key, &credentials.api_secret, testnet)?)),
        ExchangeKind::Kraken => Ok(Box::new(KrakenFutures::new(&credentials.api_key, &credentials.api_secret, testnet)?)),
    }
}
