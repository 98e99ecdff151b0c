//! Control-frame construction and inbound-frame parsing.

use chrono::Utc;
use kis_core::types::{
    ChannelKind, ExecutionNotice, OrderbookSnapshot, PriceTick, StreamEvent,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};

/// Build a subscribe (tr_type "1") or unsubscribe (tr_type "2") frame.
fn control_frame(approval_key: &str, tr_type: &str, kind: ChannelKind, symbol: &str) -> String {
    json!({
        "header": {
            "approval_key": approval_key,
            "custtype": "P",
            "tr_type": tr_type,
            "content-type": "utf-8",
        },
        "body": {
            "input": {
                "tr_id": kind.tr_id(),
                "tr_key": symbol,
            }
        }
    })
    .to_string()
}

pub fn subscribe_frame(approval_key: &str, kind: ChannelKind, symbol: &str) -> String {
    control_frame(approval_key, "1", kind, symbol)
}

pub fn unsubscribe_frame(approval_key: &str, kind: ChannelKind, symbol: &str) -> String {
    control_frame(approval_key, "2", kind, symbol)
}

fn field_str(body: &Value, key: &str) -> String {
    match &body[key] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn field_decimal(body: &Value, key: &str) -> Decimal {
    field_str(body, key).trim().parse().unwrap_or(Decimal::ZERO)
}

fn field_f64(body: &Value, key: &str) -> f64 {
    field_str(body, key).trim().parse().unwrap_or(0.0)
}

fn field_u64(body: &Value, key: &str) -> u64 {
    field_str(body, key).trim().parse().unwrap_or(0)
}

/// Parse an inbound data frame into its demux key and event.
///
/// Returns `None` for malformed frames and for frames that are not data
/// (subscription acks, unknown tr_ids) — those are logged and dropped by
/// the caller, never raised.
pub fn parse_frame(text: &str) -> Option<(ChannelKind, String, StreamEvent)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let tr_id = value["header"]["tr_id"].as_str()?;
    let kind = ChannelKind::from_tr_id(tr_id)?;
    let body = &value["body"];

    // Subscription acks carry a result code instead of market data
    if body.get("rt_cd").is_some() {
        return None;
    }

    let symbol = {
        let tr_key = field_str(body, "tr_key");
        if tr_key.is_empty() {
            field_str(body, "mksc_shrn_iscd")
        } else {
            tr_key
        }
    };
    if symbol.is_empty() {
        return None;
    }

    let timestamp = Utc::now();
    let event = match kind {
        ChannelKind::Price => StreamEvent::Price(PriceTick {
            symbol: symbol.clone(),
            price: field_decimal(body, "stck_prpr"),
            change: field_decimal(body, "prdy_vrss"),
            change_rate: field_f64(body, "prdy_vrss_rate"),
            volume: field_u64(body, "acml_vol"),
            timestamp,
        }),
        ChannelKind::Orderbook => {
            let mut bid_prices = Vec::with_capacity(10);
            let mut bid_volumes = Vec::with_capacity(10);
            let mut ask_prices = Vec::with_capacity(10);
            let mut ask_volumes = Vec::with_capacity(10);
            for level in 1..=10 {
                bid_prices.push(field_decimal(body, &format!("bidp{level}")));
                bid_volumes.push(field_u64(body, &format!("bidp_rsqn{level}")));
                ask_prices.push(field_decimal(body, &format!("askp{level}")));
                ask_volumes.push(field_u64(body, &format!("askp_rsqn{level}")));
            }
            StreamEvent::Orderbook(OrderbookSnapshot {
                symbol: symbol.clone(),
                bid_prices,
                bid_volumes,
                ask_prices,
                ask_volumes,
                timestamp,
            })
        }
        ChannelKind::Execution => StreamEvent::Execution(ExecutionNotice {
            symbol: symbol.clone(),
            order_id: field_str(body, "odno"),
            filled_quantity: field_decimal(body, "cntg_qty"),
            fill_price: field_decimal(body, "cntg_unpr"),
            timestamp,
        }),
    };

    Some((kind, symbol, event))
}
