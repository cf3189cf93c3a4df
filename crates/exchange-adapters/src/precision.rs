use core_types::SymbolPrecision;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

use crate::error::AdapterError;

/// Rounds `qty` down to a multiple of `step` using fixed-point decimal math
/// (never float — avoids artifacts like `0.180000000000004`).
pub fn floor_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return qty;
    }
    (qty / step).round_dp_with_strategy(0, RoundingStrategy::ToZero) * step
}

/// Base-asset quantity rounded to the symbol's `step_size`, validated against
/// `min_qty`/`min_notional`. Used by every adapter except OKX/Huobi, which
/// instead convert to contract units via [`quantity_to_contracts`].
pub fn round_quantity(
    symbol: &str,
    qty: Decimal,
    price: Decimal,
    precision: &SymbolPrecision,
) -> Result<Decimal, AdapterError> {
    let rounded = floor_to_step(qty, precision.step_size);
    validate_quantity(symbol, rounded, price, precision)?;
    Ok(rounded)
}

/// OKX/Huobi contract-unit conversion: `contracts = floor(qty / contract_value, step_size)`.
/// `contract_value` must be present on the precision record for contract-unit exchanges.
pub fn quantity_to_contracts(
    symbol: &str,
    qty: Decimal,
    price: Decimal,
    precision: &SymbolPrecision,
) -> Result<Decimal, AdapterError> {
    let contract_value = precision
        .contract_value
        .ok_or_else(|| AdapterError::UnknownPrecision(symbol.to_string()))?;

    if contract_value.is_zero() {
        return Err(AdapterError::InvalidQuantity {
            symbol: symbol.to_string(),
            reason: "contract_value is zero".to_string(),
        });
    }

    let raw_contracts = qty / contract_value;
    let contracts = floor_to_step(raw_contracts, precision.step_size);
    validate_quantity(symbol, contracts, price, precision)?;
    Ok(contracts)
}

fn validate_quantity(
    symbol: &str,
    qty: Decimal,
    price: Decimal,
    precision: &SymbolPrecision,
) -> Result<(), AdapterError> {
    if qty < precision.min_qty {
        return Err(AdapterError::InvalidQuantity {
            symbol: symbol.to_string(),
            reason: format!("{qty} is below min_qty {}", precision.min_qty),
        });
    }
    let notional = qty * price;
    if notional < precision.min_notional {
        return Err(AdapterError::InvalidQuantity {
            symbol: symbol.to_string(),
            reason: format!("notional {notional} is below min_notional {}", precision.min_notional),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn precision() -> SymbolPrecision {
        SymbolPrecision {
            quantity_precision: 3,
            price_precision: 1,
            step_size: dec!(0.001),
            tick_size: dec!(0.1),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
            contract_value: None,
        }
    }

    #[test]
    fn floor_to_step_truncates_not_rounds() {
        assert_eq!(floor_to_step(dec!(1.2399), dec!(0.01)), dec!(1.23));
    }

    #[test]
    fn round_quantity_rejects_below_min_notional() {
        let p = precision();
        let err = round_quantity("BTCUSDT", dec!(0.001), dec!(1000), &p);
        // notional = 0.001 * 1000 = 1, below min_notional 5
        assert!(matches!(err, Err(AdapterError::InvalidQuantity { .. })));
    }

    #[test]
    fn quantity_to_contracts_uses_contract_value() {
        let mut p = precision();
        p.contract_value = Some(dec!(0.01));
        p.step_size = dec!(1);
        p.min_qty = dec!(1);
        p.min_notional = dec!(1);
        // 0.18 crypto / 0.01 contract_value = 18 contracts exactly
        let contracts = quantity_to_contracts("BTC-USDT-SWAP", dec!(0.18), dec!(60000), &p).unwrap();
        assert_eq!(contracts, dec!(18));
    }
}
