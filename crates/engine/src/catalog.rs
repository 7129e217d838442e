//! Built-in source catalog used when no configuration file is present.

use indexmap::IndexMap;
use ratewatch_types::{CurrencyFamily, Instrument};

use crate::config::{InstrumentConfig, RefresherTargetConfig, SourceConfig, SourceKind};

const MOEX_SELECTOR: &str =
    "#app > div:nth-child(2) > div.ui-container.-default > div > div.ui-table > div.ui-table__container > table > tbody > tr:nth-child(1) > td:nth-child(2)";
const XE_SELECTOR: &str = "#__next main div[data-testid='conversion'] p:nth-of-type(2)";
const INVESTING_SELECTOR: &str = "span[data-test='instrument-price-last']";
const INVESTING_COOKIE_BUTTON: &str = "#onetrust-accept-btn-handler";

/// Sources for USD/RUB, EUR/RUB and CNY/RUB.
pub fn builtin_instruments() -> IndexMap<String, InstrumentConfig> {
    [("usd", "#app table tbody tr:nth-child(1) td:nth-child(2)"), ("eur", "#b_30"), ("cny", "#b_CNY_RUB")]
        .into_iter()
        .filter_map(|(code, profinance_selector)| {
            let instrument = Instrument::new(code, "RUB").ok()?;
            let mut sources = core_sources(code, profinance_selector);
            sources.extend(extra_sources(instrument.family()));
            Some((instrument.to_string(), InstrumentConfig { sources }))
        })
        .collect()
}

/// Extra rows appended after the core rows, chosen by currency family.
pub fn extra_sources(family: CurrencyFamily) -> Vec<SourceConfig> {
    match family {
        CurrencyFamily::Usd => usd_extras(),
        CurrencyFamily::Eur => vec![xe_source("xe_eur_usd", "EUR", "USD"), xe_source("xe_usd_eur", "USD", "EUR")],
        CurrencyFamily::Cny => vec![xe_source("xe_usd_cny", "USD", "CNY"), xe_source("xe_cny_usd", "CNY", "USD")],
        CurrencyFamily::Other => Vec::new(),
    }
}

/// One warm page per tracked instrument on Investing.
pub fn builtin_refresher_targets() -> Vec<RefresherTargetConfig> {
    ["usd", "eur", "cny"]
        .into_iter()
        .map(|code| RefresherTargetConfig {
            instrument: format!("{}/RUB", code.to_ascii_uppercase()),
            url: format!("https://ru.investing.com/currencies/{code}-rub"),
            selector: INVESTING_SELECTOR.to_string(),
            dismiss_selector: Some(INVESTING_COOKIE_BUTTON.to_string()),
        })
        .collect()
}

fn core_sources(pair: &str, profinance_selector: &str) -> Vec<SourceConfig> {
    let upper = pair.to_ascii_uppercase();
    vec![
        SourceConfig::new("investing", "Investing", SourceKind::Cached),
        SourceConfig::new("cbr", "CBR", SourceKind::Dated),
        SourceConfig {
            url: Some(format!("https://www.profinance.ru/chart/{pair}rub/")),
            selector: Some(profinance_selector.to_string()),
            settle_ms: Some(5_000),
            timeout_ms: Some(20_000),
            ..SourceConfig::new("profinance", "ProFinance", SourceKind::Scrape)
        },
        SourceConfig {
            url: Some(format!("https://www.moex.com/ru/derivatives/currency-rate.aspx?currency={upper}_RUB")),
            selector: Some(MOEX_SELECTOR.to_string()),
            timeout_ms: Some(20_000),
            ..SourceConfig::new("moex", "MOEX", SourceKind::Scrape)
        },
    ]
}

fn xe_source(id: &str, from: &str, to: &str) -> SourceConfig {
    SourceConfig {
        extra: true,
        suffix: Some(format!("{from}/{to}")),
        url: Some(format!("https://www.xe.com/currencyconverter/convert/?Amount=1&From={from}&To={to}")),
        selector: Some(XE_SELECTOR.to_string()),
        timeout_ms: Some(20_000),
        ..SourceConfig::new(id, "XE", SourceKind::Scrape)
    }
}

fn usd_extras() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            extra: true,
            url: Some("https://abcex.io/api/v1/exchange/public/market-data/order-book/depth?marketId=USDTRUB&lang=ru".to_string()),
            field_path: Some("bid.0.price".to_string()),
            timeout_ms: Some(15_000),
            ..SourceConfig::new("abcex", "ABCEX", SourceKind::HttpJson)
        },
        SourceConfig {
            extra: true,
            suffix: Some("USDT/RUB".to_string()),
            url: Some("https://grinex.io/trading/usdta7a5".to_string()),
            selector: Some("#order_book_holder div.bid_orders_panel table tbody tr:nth-child(1) td.price div".to_string()),
            dismiss_selector: Some("#privacy-agree-modal button[data-action='click->dialog#closeOutside']".to_string()),
            settle_ms: Some(5_000),
            timeout_ms: Some(30_000),
            ..SourceConfig::new("grinex", "Grinex", SourceKind::Scrape)
        },
        SourceConfig {
            extra: true,
            suffix: Some("GOLD/USD".to_string()),
            url: Some("https://www.tradingview.com/symbols/XAUUSD/".to_string()),
            selector: Some("span.js-symbol-last".to_string()),
            timeout_ms: Some(20_000),
            ..SourceConfig::new("tradingview", "TradingView", SourceKind::Scrape)
        },
    ]
}
