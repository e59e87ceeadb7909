//! End-to-end scenarios (§8): each drives the public API the way a collaborator process
//! would, against an `httpmock` double of the market-data backend.

use std::sync::Arc;
use std::time::Duration;

use httpmock::{Method::GET, MockServer};
use stockdb::alerts::{AlertsEngine, PriceChangeOp};
use stockdb::client::HttpClient;
use stockdb::expr::{self, ExprContext, ExprValue};
use stockdb::fetchlevel::FetchLevel;
use stockdb::intern::StringTable;
use stockdb::realtime::RealtimeMonitor;
use stockdb::stockdb::StockDb;
use stockdb::symbol::Symbol;

fn test_db(server: &MockServer) -> Arc<StockDb> {
    let http = Arc::new(
        HttpClient::builder()
            .backend(url::Url::parse(&server.base_url()).unwrap())
            .disable_disk_cache()
            .build()
            .unwrap(),
    );
    Arc::new(StockDb::new(Arc::new(StringTable::new()), http))
}

async fn wait_until_resolved(db: &Arc<StockDb>, handle: stockdb::Handle, level: FetchLevel) {
    for _ in 0..200 {
        if db.get(handle).await.has_resolved(level) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("level {level:?} never resolved");
}

fn realtime_body(timestamp: i64, open: f64, close: f64) -> serde_json::Value {
    serde_json::json!({
        "timestamp": timestamp,
        "gmtoffset": 0,
        "open": open,
        "close": close,
        "previousClose": open,
        "low": open.min(close),
        "high": open.max(close),
        "change": close - open,
        "change_p": 0.0,
        "volume": 1000
    })
}

/// Scenario 1: `initialize_handle` then `request(REALTIME)` resolves with a finite close.
#[tokio::test]
async fn scenario_1_initialize_and_request_realtime() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/real-time/U.US");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(realtime_body(1_700_000_000, 10.0, 12.0));
    });

    let db = test_db(&server);
    let symbol = Symbol::new("U.US");
    let handle = db.initialize_handle(&symbol).unwrap();
    assert_eq!(handle.id, symbol.hash64());
    assert!(!handle.code_symbol.is_null());

    db.request(&symbol, FetchLevel::REALTIME).await.unwrap();
    wait_until_resolved(&db, handle, FetchLevel::REALTIME).await;

    let stock = db.get(handle).await;
    assert!(stock.current.close.is_finite());
    assert!((stock.current.close - 12.0).abs() < 1e-9);
}

/// Scenario 2: repeated `add_price_change` for the same symbol leaves exactly one alert.
#[tokio::test]
async fn scenario_2_repeated_price_decrease_collapses_to_one_alert() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/fundamentals/BB.TO");
        then.status(200).json_body(serde_json::json!({}));
    });

    let db = test_db(&server);
    let mut engine = AlertsEngine::new();
    let symbol = Symbol::new("BB.TO");

    engine
        .add_price_change(&db, &symbol, 5.0, PriceChangeOp::LessOrEqual)
        .await
        .unwrap();
    engine
        .add_price_change(&db, &symbol, 4.5, PriceChangeOp::LessOrEqual)
        .await
        .unwrap();

    assert_eq!(engine.len(), 1);
    assert!(engine.evaluators()[0].expression.starts_with("S(\"BB.TO\", price)<="));
}

/// Scenario 3: registering a real-time stock then letting the monitor poll once appends a
/// new record to the stream, with the stock's current price advancing to the newest value.
#[tokio::test]
async fn scenario_3_realtime_registration_and_poll_appends_record() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/real-time/AAPL.US");
        then.status(200).json_body(realtime_body(1_700_000_300, 180.0, 181.0));
    });

    let http = Arc::new(
        HttpClient::builder()
            .backend(url::Url::parse(&server.base_url()).unwrap())
            .disable_disk_cache()
            .build()
            .unwrap(),
    );

    let dir = tempfile::tempdir().unwrap();
    let monitor = RealtimeMonitor::open(dir.path().join("rt.stream"), http).unwrap();

    let symbol = Symbol::new("AAPL.US");
    monitor.register(&symbol, Some((1_700_000_000, 180.0, 100.0))).await;

    let task = tokio::spawn(Arc::clone(&monitor).run());
    let mut snap = monitor.snapshot(&symbol).await.unwrap();
    for _ in 0..100 {
        if snap.records.len() > 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        snap = monitor.snapshot(&symbol).await.unwrap();
    }
    monitor.stop();
    task.abort();

    assert_eq!(snap.records.len(), 2);
    assert!((snap.price - 181.0).abs() < 1e-9);
    assert_eq!(snap.records[0].0, 1_700_000_000);
    assert_eq!(snap.records[1].0, 1_700_000_300);
}

/// Scenario 4: `S(code, close) - S(code, open)` against a realtime-resolved stock.
#[tokio::test]
async fn scenario_4_expression_subtracts_close_and_open() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/real-time/U.US");
        then.status(200).json_body(realtime_body(1_700_000_000, 10.0, 12.5));
    });

    let db = test_db(&server);
    let symbol = Symbol::new("U.US");
    let handle = db.request(&symbol, FetchLevel::REALTIME).await.unwrap().0;
    wait_until_resolved(&db, handle, FetchLevel::REALTIME).await;

    let ctx = ExprContext::new(Arc::clone(&db));
    let value = expr::eval("S(\"U.US\", close) - S(\"U.US\", open)", &ctx).await.unwrap();
    assert!((value.as_number() - 2.5).abs() < 1e-9);
}

/// Scenario 5: `S(code, close, date)` returns the adjusted close for a specific history day.
#[tokio::test]
async fn scenario_5_expression_looks_up_history_by_date() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/real-time/U.US");
        then.status(200).json_body(realtime_body(1_700_000_000, 1.0, 1.0));
    });
    server.mock(|when, then| {
        when.method(GET).path("/eod/U.US");
        then.status(200).json_body(serde_json::json!([
            {"date": "2022-10-12", "open": 36.0, "close": 37.1, "adjusted_close": 37.1, "low": 35.5, "high": 37.5, "volume": 5000},
            {"date": "2022-10-11", "open": 35.0, "close": 36.0, "adjusted_close": 36.0, "low": 34.5, "high": 36.5, "volume": 5000}
        ]));
    });

    let db = test_db(&server);
    let ctx = ExprContext::new(Arc::clone(&db));
    let value = expr::eval("S(\"U.US\", close, \"2022-10-12\")", &ctx).await.unwrap();
    assert!((value.as_number() - 37.1).abs() < 1e-9);
}

/// Scenario 6: an `S($TITLE, price)` alert trips once the current price crosses the
/// threshold, and a second tick within the 5s window is suppressed.
#[tokio::test]
async fn scenario_6_alert_triggers_then_throttles_second_tick() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/real-time/U.US");
        then.status(200).json_body(realtime_body(1_700_000_000, 48.0, 50.0));
    });
    server.mock(|when, then| {
        when.method(GET).path("/fundamentals/U.US");
        then.status(200).json_body(serde_json::json!({}));
    });

    let db = test_db(&server);
    let symbol = Symbol::new("U.US");
    let handle = db.request(&symbol, FetchLevel::REALTIME).await.unwrap().0;
    wait_until_resolved(&db, handle, FetchLevel::REALTIME).await;

    let mut engine = AlertsEngine::new();
    engine
        .add_price_change(&db, &symbol, 45.0, PriceChangeOp::GreaterOrEqual)
        .await
        .unwrap();

    let evaluated = engine.tick(&db).await.unwrap();
    assert_eq!(evaluated, Some(0));
    assert_ne!(engine.evaluators()[0].triggered_time, 0);

    // A second tick immediately after is suppressed by the 5s minimum tick spacing.
    let second = engine.tick(&db).await.unwrap();
    assert_eq!(second, None);
}

/// `S(code, field, "ALL")` yields exactly `len(history) + 1` pairs once REALTIME and EOD are
/// resolved (§8 universal invariant).
#[tokio::test]
async fn s_all_returns_history_len_plus_one_pairs() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/real-time/U.US");
        then.status(200).json_body(realtime_body(1_700_000_000, 1.0, 1.0));
    });
    server.mock(|when, then| {
        when.method(GET).path("/eod/U.US");
        then.status(200).json_body(serde_json::json!([
            {"date": "2022-10-12", "open": 36.0, "close": 37.1, "adjusted_close": 37.1, "low": 35.5, "high": 37.5, "volume": 5000},
            {"date": "2022-10-11", "open": 35.0, "close": 36.0, "adjusted_close": 36.0, "low": 34.5, "high": 36.5, "volume": 5000},
            {"date": "2022-10-10", "open": 34.0, "close": 35.0, "adjusted_close": 35.0, "low": 33.5, "high": 35.5, "volume": 5000}
        ]));
    });

    let db = test_db(&server);
    let ctx = ExprContext::new(Arc::clone(&db));
    let value = expr::eval("S(\"U.US\", close, \"ALL\")", &ctx).await.unwrap();
    let ExprValue::List(pairs) = value else { panic!("expected a list") };
    assert_eq!(pairs.len(), 4);
}
