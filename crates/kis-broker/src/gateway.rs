//! Authenticated REST operations against the KIS OpenAPI.
//!
//! Every response is checked against the payload-level result code
//! (`rt_cd`): the upstream API signals business failures (insufficient
//! funds, market closed, invalid symbol) inside a 200 envelope.

use kis_core::types::{
    Credentials, OrderRequest, OrderResult, OrderStatus, OrderType, Side,
};
use kis_core::{ApiError, TradingError, TradingResult};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::dispatch::RateLimitedDispatcher;

const BALANCE_PATH: &str = "/uapi/domestic-stock/v1/trading/inquire-balance";
const PRICE_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-price";
const ORDER_PATH: &str = "/uapi/domestic-stock/v1/trading/order-cash";
const REVISE_CANCEL_PATH: &str = "/uapi/domestic-stock/v1/trading/order-rvsecncl";
const HISTORY_PATH: &str = "/uapi/domestic-stock/v1/trading/inquire-daily-ccld";

const TR_BALANCE: &str = "TTTC8434R";
const TR_PRICE: &str = "FHKST01010100";
const TR_ORDER_BUY: &str = "TTTC0802U";
const TR_ORDER_SELL: &str = "TTTC0801U";
const TR_REVISE_CANCEL: &str = "TTTC0803U";
const TR_HISTORY: &str = "TTTC8001R";

/// Account balance summary.
#[derive(Debug, Clone)]
pub struct Balance {
    /// Deposit (cash) amount
    pub cash: Decimal,
    /// Total evaluation amount (cash + securities)
    pub total_evaluation: Decimal,
    /// Evaluated profit/loss across holdings
    pub profit_loss: Decimal,
}

/// One holding row from the balance inquiry.
#[derive(Debug, Clone)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub profit_loss: Decimal,
}

/// Current price quote for a symbol.
#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: Decimal,
    pub change: Decimal,
    pub change_rate: f64,
    pub volume: u64,
}

/// One row from the daily order history inquiry.
#[derive(Debug, Clone)]
pub struct OrderHistoryEntry {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_date: String,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
}

#[derive(Deserialize)]
struct Envelope {
    rt_cd: String,
    #[serde(default)]
    msg_cd: String,
    #[serde(default)]
    msg1: String,
}

#[derive(Deserialize)]
struct KisBalanceSummary {
    #[serde(default)]
    dnca_tot_amt: String,
    #[serde(default)]
    tot_evlu_amt: String,
    #[serde(default)]
    evlu_pfls_smtl_amt: String,
}

#[derive(Deserialize)]
struct KisHolding {
    #[serde(default)]
    pdno: String,
    #[serde(default)]
    prdt_name: String,
    #[serde(default)]
    hldg_qty: String,
    #[serde(default)]
    pchs_avg_pric: String,
    #[serde(default)]
    prpr: String,
    #[serde(default)]
    evlu_pfls_amt: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    output1: Vec<KisHolding>,
    #[serde(default)]
    output2: Vec<KisBalanceSummary>,
}

#[derive(Deserialize)]
struct KisPrice {
    #[serde(default)]
    stck_prpr: String,
    #[serde(default)]
    prdy_vrss: String,
    #[serde(default)]
    prdy_ctrt: String,
    #[serde(default)]
    acml_vol: String,
}

#[derive(Deserialize)]
struct PriceResponse {
    output: Option<KisPrice>,
}

#[derive(Deserialize)]
struct KisOrderOutput {
    #[serde(rename = "ODNO", default)]
    odno: String,
}

#[derive(Deserialize)]
struct OrderResponse {
    output: Option<KisOrderOutput>,
}

#[derive(Deserialize)]
struct KisHistoryRow {
    #[serde(default)]
    odno: String,
    #[serde(default)]
    pdno: String,
    #[serde(default)]
    sll_buy_dvsn_cd: String,
    #[serde(default)]
    ord_dt: String,
    #[serde(default)]
    ord_qty: String,
    #[serde(default)]
    tot_ccld_qty: String,
    #[serde(default)]
    tot_ccld_amt: String,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    output1: Vec<KisHistoryRow>,
}

#[derive(Serialize)]
struct CashOrderBody<'a> {
    #[serde(rename = "CANO")]
    cano: &'a str,
    #[serde(rename = "ACNT_PRDT_CD")]
    acnt_prdt_cd: &'a str,
    #[serde(rename = "PDNO")]
    pdno: &'a str,
    #[serde(rename = "ORD_DVSN")]
    ord_dvsn: &'a str,
    #[serde(rename = "ORD_QTY")]
    ord_qty: String,
    #[serde(rename = "ORD_UNPR")]
    ord_unpr: String,
}

#[derive(Serialize)]
struct ReviseCancelBody<'a> {
    #[serde(rename = "CANO")]
    cano: &'a str,
    #[serde(rename = "ACNT_PRDT_CD")]
    acnt_prdt_cd: &'a str,
    #[serde(rename = "KRX_FWDG_ORD_ORGNO")]
    krx_fwdg_ord_orgno: &'a str,
    #[serde(rename = "ORGN_ODNO")]
    orgn_odno: &'a str,
    #[serde(rename = "ORD_DVSN")]
    ord_dvsn: &'a str,
    #[serde(rename = "RVSE_CNCL_DVSN_CD")]
    rvse_cncl_dvsn_cd: &'a str,
    #[serde(rename = "ORD_QTY")]
    ord_qty: String,
    #[serde(rename = "ORD_UNPR")]
    ord_unpr: String,
    #[serde(rename = "QTY_ALL_ORD_YN")]
    qty_all_ord_yn: &'a str,
}

fn parse_decimal(raw: &str) -> Decimal {
    raw.trim().parse().unwrap_or(Decimal::ZERO)
}

fn parse_balance(response: BalanceResponse) -> Balance {
    let summary = response.output2.into_iter().next();
    match summary {
        Some(s) => Balance {
            cash: parse_decimal(&s.dnca_tot_amt),
            total_evaluation: parse_decimal(&s.tot_evlu_amt),
            profit_loss: parse_decimal(&s.evlu_pfls_smtl_amt),
        },
        None => Balance {
            cash: Decimal::ZERO,
            total_evaluation: Decimal::ZERO,
            profit_loss: Decimal::ZERO,
        },
    }
}

fn parse_holding(row: KisHolding) -> Holding {
    Holding {
        symbol: row.pdno,
        name: row.prdt_name,
        quantity: parse_decimal(&row.hldg_qty),
        average_price: parse_decimal(&row.pchs_avg_pric),
        current_price: parse_decimal(&row.prpr),
        profit_loss: parse_decimal(&row.evlu_pfls_amt),
    }
}

fn parse_history_row(row: KisHistoryRow) -> OrderHistoryEntry {
    let filled = parse_decimal(&row.tot_ccld_qty);
    let filled_amount = parse_decimal(&row.tot_ccld_amt);
    let average_fill_price = if filled > Decimal::ZERO {
        Some(filled_amount / filled)
    } else {
        None
    };

    OrderHistoryEntry {
        order_id: row.odno,
        symbol: row.pdno,
        // 01: sell, 02: buy
        side: if row.sll_buy_dvsn_cd == "01" {
            Side::Sell
        } else {
            Side::Buy
        },
        order_date: row.ord_dt,
        quantity: parse_decimal(&row.ord_qty),
        filled_quantity: filled,
        average_fill_price,
    }
}

/// One operation per trading/account action, each built on the token
/// manager (through the dispatcher) and the rate-limited dispatcher.
pub struct RestGateway {
    dispatcher: Arc<RateLimitedDispatcher>,
    credentials: Credentials,
}

impl RestGateway {
    /// Create a gateway. Fails fast with a configuration error when the
    /// dispatcher's token manager is scoped to a different environment —
    /// mixing tokens across environments is an invariant violation.
    pub fn new(
        dispatcher: Arc<RateLimitedDispatcher>,
        credentials: Credentials,
    ) -> TradingResult<Self> {
        let token_env = dispatcher.tokens().credentials().environment;
        if token_env != credentials.environment {
            return Err(TradingError::Config(format!(
                "token manager is scoped to {token_env}, gateway credentials are {}",
                credentials.environment
            )));
        }
        Ok(Self {
            dispatcher,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.credentials.environment.base_url(), path)
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> TradingResult<T> {
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let envelope: Envelope =
            serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))?;

        if envelope.rt_cd != "0" {
            return Err(ApiError::TradeRejected {
                code: envelope.msg_cd,
                message: envelope.msg1,
            }
            .into());
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()).into())
    }

    /// Account balance summary.
    pub async fn get_balance(&self) -> TradingResult<Balance> {
        let response: BalanceResponse = self.inquire_balance().await?;
        Ok(parse_balance(response))
    }

    /// Current holdings (the balance inquiry's position rows).
    pub async fn get_holdings(&self) -> TradingResult<Vec<Holding>> {
        let response: BalanceResponse = self.inquire_balance().await?;
        Ok(response.output1.into_iter().map(parse_holding).collect())
    }

    async fn inquire_balance(&self) -> TradingResult<BalanceResponse> {
        let url = self.url(BALANCE_PATH);
        let cano = self.credentials.account_prefix().to_string();
        let product = self.credentials.account_product_code().to_string();
        let app_key = self.credentials.app_key.clone();
        let app_secret = self.credentials.app_secret.clone();

        let response = self
            .dispatcher
            .send(move |http, token| {
                http.get(&url)
                    .header("authorization", token.bearer())
                    .header("appkey", app_key.as_str())
                    .header("appsecret", app_secret.as_str())
                    .header("tr_id", TR_BALANCE)
                    .header("custtype", "P")
                    .query(&[
                        ("CANO", cano.as_str()),
                        ("ACNT_PRDT_CD", product.as_str()),
                        ("AFHR_FLPR_YN", "N"),
                        ("OFL_YN", ""),
                        ("INQR_DVSN", "02"),
                        ("UNPR_DVSN", "01"),
                        ("FUND_STTL_ICLD_YN", "N"),
                        ("FNCG_AMT_AUTO_RDPT_YN", "N"),
                        ("PRCS_DVSN", "01"),
                        ("CTX_AREA_FK100", ""),
                        ("CTX_AREA_NK100", ""),
                    ])
            })
            .await?;

        Self::read_envelope(response).await
    }

    /// Current price for a symbol.
    pub async fn get_current_price(&self, symbol: &str) -> TradingResult<PriceQuote> {
        let url = self.url(PRICE_PATH);
        let symbol_owned = symbol.to_string();
        let app_key = self.credentials.app_key.clone();
        let app_secret = self.credentials.app_secret.clone();

        let response = self
            .dispatcher
            .send(move |http, token| {
                http.get(&url)
                    .header("authorization", token.bearer())
                    .header("appkey", app_key.as_str())
                    .header("appsecret", app_secret.as_str())
                    .header("tr_id", TR_PRICE)
                    .header("custtype", "P")
                    .query(&[
                        ("FID_COND_MRKT_DIV_CODE", "J"),
                        ("FID_INPUT_ISCD", symbol_owned.as_str()),
                    ])
            })
            .await?;

        let parsed: PriceResponse = Self::read_envelope(response).await?;
        let output = parsed
            .output
            .ok_or_else(|| ApiError::Parse("price response missing output".to_string()))?;

        Ok(PriceQuote {
            symbol: symbol.to_string(),
            price: parse_decimal(&output.stck_prpr),
            change: parse_decimal(&output.prdy_vrss),
            change_rate: output.prdy_ctrt.trim().parse().unwrap_or(0.0),
            volume: output.acml_vol.trim().parse().unwrap_or(0),
        })
    }

    /// Place a cash order. Validates the request before any network call.
    pub async fn place_order(&self, request: &OrderRequest) -> TradingResult<OrderResult> {
        if request.quantity <= Decimal::ZERO {
            return Err(TradingError::Validation(
                "order quantity must be positive".to_string(),
            ));
        }
        if request.order_type == OrderType::Limit {
            match request.limit_price {
                Some(price) if price > Decimal::ZERO => {}
                _ => {
                    return Err(TradingError::Validation(
                        "limit orders require a positive limit price".to_string(),
                    ))
                }
            }
        }

        let tr_id = match request.side {
            Side::Buy => TR_ORDER_BUY,
            Side::Sell => TR_ORDER_SELL,
        };

        let unit_price = match request.order_type {
            OrderType::Limit => request
                .limit_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "0".to_string()),
            OrderType::Market => "0".to_string(),
        };

        let url = self.url(ORDER_PATH);
        let app_key = self.credentials.app_key.clone();
        let app_secret = self.credentials.app_secret.clone();
        let body = serde_json::to_value(CashOrderBody {
            cano: self.credentials.account_prefix(),
            acnt_prdt_cd: self.credentials.account_product_code(),
            pdno: &request.symbol,
            ord_dvsn: request.order_type.division_code(),
            ord_qty: request.quantity.to_string(),
            ord_unpr: unit_price,
        })
        .map_err(|e| ApiError::Parse(e.to_string()))?;

        debug!(symbol = %request.symbol, side = %request.side, quantity = %request.quantity, "Submitting order");

        let response = self
            .dispatcher
            .send(move |http, token| {
                http.post(&url)
                    .header("authorization", token.bearer())
                    .header("appkey", app_key.as_str())
                    .header("appsecret", app_secret.as_str())
                    .header("tr_id", tr_id)
                    .header("custtype", "P")
                    .json(&body)
            })
            .await?;

        let parsed: OrderResponse = Self::read_envelope(response).await?;
        let output = parsed
            .output
            .ok_or_else(|| ApiError::Parse("order response missing output".to_string()))?;

        info!(order_id = %output.odno, symbol = %request.symbol, "Order accepted");

        Ok(OrderResult {
            order_id: output.odno,
            status: OrderStatus::Accepted,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
        })
    }

    /// Cancel the full remaining quantity of an order.
    pub async fn cancel_order(&self, order_id: &str) -> TradingResult<OrderResult> {
        self.revise_or_cancel(order_id, "02", Decimal::ZERO, None, "Y")
            .await
    }

    /// Modify an order's quantity and (for limit orders) price.
    pub async fn modify_order(
        &self,
        order_id: &str,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> TradingResult<OrderResult> {
        if quantity <= Decimal::ZERO {
            return Err(TradingError::Validation(
                "modified quantity must be positive".to_string(),
            ));
        }
        self.revise_or_cancel(order_id, "01", quantity, price, "N")
            .await
    }

    async fn revise_or_cancel(
        &self,
        order_id: &str,
        division: &'static str,
        quantity: Decimal,
        price: Option<Decimal>,
        all_quantity: &'static str,
    ) -> TradingResult<OrderResult> {
        let url = self.url(REVISE_CANCEL_PATH);
        let app_key = self.credentials.app_key.clone();
        let app_secret = self.credentials.app_secret.clone();
        let body = serde_json::to_value(ReviseCancelBody {
            cano: self.credentials.account_prefix(),
            acnt_prdt_cd: self.credentials.account_product_code(),
            krx_fwdg_ord_orgno: "",
            orgn_odno: order_id,
            ord_dvsn: "00",
            rvse_cncl_dvsn_cd: division,
            ord_qty: quantity.to_string(),
            ord_unpr: price.map(|p| p.to_string()).unwrap_or_else(|| "0".to_string()),
            qty_all_ord_yn: all_quantity,
        })
        .map_err(|e| ApiError::Parse(e.to_string()))?;

        let response = self
            .dispatcher
            .send(move |http, token| {
                http.post(&url)
                    .header("authorization", token.bearer())
                    .header("appkey", app_key.as_str())
                    .header("appsecret", app_secret.as_str())
                    .header("tr_id", TR_REVISE_CANCEL)
                    .header("custtype", "P")
                    .json(&body)
            })
            .await?;

        let parsed: OrderResponse = Self::read_envelope(response).await?;
        let output = parsed
            .output
            .ok_or_else(|| ApiError::Parse("order response missing output".to_string()))?;

        let status = if division == "02" {
            OrderStatus::Canceled
        } else {
            OrderStatus::Accepted
        };

        info!(order_id = %output.odno, division, "Order revised");

        Ok(OrderResult {
            order_id: output.odno,
            status,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
        })
    }

    /// Order history for a date range (YYYYMMDD inclusive).
    pub async fn get_order_history(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> TradingResult<Vec<OrderHistoryEntry>> {
        let url = self.url(HISTORY_PATH);
        let cano = self.credentials.account_prefix().to_string();
        let product = self.credentials.account_product_code().to_string();
        let app_key = self.credentials.app_key.clone();
        let app_secret = self.credentials.app_secret.clone();
        let start = start_date.to_string();
        let end = end_date.to_string();

        let response = self
            .dispatcher
            .send(move |http, token| {
                http.get(&url)
                    .header("authorization", token.bearer())
                    .header("appkey", app_key.as_str())
                    .header("appsecret", app_secret.as_str())
                    .header("tr_id", TR_HISTORY)
                    .header("custtype", "P")
                    .query(&[
                        ("CANO", cano.as_str()),
                        ("ACNT_PRDT_CD", product.as_str()),
                        ("INQR_STRT_DT", start.as_str()),
                        ("INQR_END_DT", end.as_str()),
                        ("SLL_BUY_DVSN_CD", "00"),
                        ("INQR_DVSN", "00"),
                        ("PDNO", ""),
                        ("CCLD_DVSN", "00"),
                        ("ORD_GNO_BRNO", ""),
                        ("ODNO", ""),
                        ("INQR_DVSN_3", "00"),
                        ("INQR_DVSN_1", ""),
                        ("CTX_AREA_FK100", ""),
                        ("CTX_AREA_NK100", ""),
                    ])
            })
            .await?;

        let parsed: HistoryResponse = Self::read_envelope(response).await?;
        Ok(parsed
            .output1
            .into_iter()
            .map(parse_history_row)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_balance_summary() {
        let raw = r#"{
            "rt_cd": "0", "msg_cd": "MCA00000", "msg1": "ok",
            "output1": [{
                "pdno": "005930", "prdt_name": "Samsung Electronics",
                "hldg_qty": "10", "pchs_avg_pric": "70000.00",
                "prpr": "71500", "evlu_pfls_amt": "15000"
            }],
            "output2": [{
                "dnca_tot_amt": "1000000", "tot_evlu_amt": "1715000",
                "evlu_pfls_smtl_amt": "15000"
            }]
        }"#;

        let response: BalanceResponse = serde_json::from_str(raw).unwrap();
        let balance = parse_balance(response);
        assert_eq!(balance.cash, dec!(1000000));
        assert_eq!(balance.total_evaluation, dec!(1715000));

        let response: BalanceResponse = serde_json::from_str(raw).unwrap();
        let holdings: Vec<Holding> = response.output1.into_iter().map(parse_holding).collect();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].symbol, "005930");
        assert_eq!(holdings[0].quantity, dec!(10));
        assert_eq!(holdings[0].average_price, dec!(70000.00));
    }

    #[test]
    fn test_parse_history_row_average_fill() {
        let row = KisHistoryRow {
            odno: "0000117057".to_string(),
            pdno: "005930".to_string(),
            sll_buy_dvsn_cd: "02".to_string(),
            ord_dt: "20250102".to_string(),
            ord_qty: "10".to_string(),
            tot_ccld_qty: "10".to_string(),
            tot_ccld_amt: "705000".to_string(),
        };

        let entry = parse_history_row(row);
        assert_eq!(entry.side, Side::Buy);
        assert_eq!(entry.average_fill_price, Some(dec!(70500)));

        let unfilled = KisHistoryRow {
            odno: "0000117058".to_string(),
            pdno: "005930".to_string(),
            sll_buy_dvsn_cd: "01".to_string(),
            ord_dt: "20250102".to_string(),
            ord_qty: "5".to_string(),
            tot_ccld_qty: "0".to_string(),
            tot_ccld_amt: "0".to_string(),
        };

        let entry = parse_history_row(unfilled);
        assert_eq!(entry.side, Side::Sell);
        assert_eq!(entry.average_fill_price, None);
    }

    #[test]
    fn test_envelope_rejection_detected() {
        let raw = r#"{"rt_cd": "1", "msg_cd": "40310000", "msg1": "insufficient funds"}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_ne!(envelope.rt_cd, "0");
        assert_eq!(envelope.msg_cd, "40310000");
    }

    mod with_dispatcher {
        use super::*;
        use crate::token::{TokenIssuer, TokenManager};
        use async_trait::async_trait;
        use chrono::Utc;
        use kis_core::types::{AccessToken, Credentials, Environment};
        use kis_core::AuthError;

        struct StaticIssuer;

        #[async_trait]
        impl TokenIssuer for StaticIssuer {
            async fn issue(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
                let now = Utc::now();
                Ok(AccessToken {
                    value: "token".to_string(),
                    token_type: "Bearer".to_string(),
                    issued_at: now,
                    expires_at: now + chrono::Duration::seconds(3600),
                    environment: credentials.environment,
                })
            }

            async fn revoke(
                &self,
                _credentials: &Credentials,
                _token: &AccessToken,
            ) -> Result<(), AuthError> {
                Ok(())
            }
        }

        fn dispatcher(environment: Environment) -> Arc<RateLimitedDispatcher> {
            let credentials = Credentials::new("key", "secret", "1234567801", environment);
            let tokens = Arc::new(TokenManager::new(credentials, Arc::new(StaticIssuer)));
            Arc::new(RateLimitedDispatcher::new(
                reqwest::Client::new(),
                tokens,
                10,
            ))
        }

        #[test]
        fn test_environment_mismatch_fails_fast() {
            let live_credentials =
                Credentials::new("key", "secret", "1234567801", Environment::Live);
            let result = RestGateway::new(dispatcher(Environment::Mock), live_credentials);
            assert!(matches!(result, Err(TradingError::Config(_))));
        }

        #[tokio::test]
        async fn test_place_order_validates_before_network() {
            let credentials = Credentials::new("key", "secret", "1234567801", Environment::Mock);
            let gateway = RestGateway::new(dispatcher(Environment::Mock), credentials).unwrap();

            let zero_qty = OrderRequest::market("005930", Side::Buy, Decimal::ZERO);
            assert!(matches!(
                gateway.place_order(&zero_qty).await,
                Err(TradingError::Validation(_))
            ));

            let mut no_price = OrderRequest::limit("005930", Side::Buy, dec!(10), dec!(70000));
            no_price.limit_price = None;
            assert!(matches!(
                gateway.place_order(&no_price).await,
                Err(TradingError::Validation(_))
            ));

            let negative_price = OrderRequest::limit("005930", Side::Buy, dec!(10), dec!(-1));
            assert!(matches!(
                gateway.place_order(&negative_price).await,
                Err(TradingError::Validation(_))
            ));
        }
    }
}
