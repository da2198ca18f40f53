//! End-to-end flow: status writes feeding the aggregator drive the watchdog
//! through one observed transition and one rescue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostwatch::core::{Aggregator, Params, Plugin, PluginContext, Severity, StatusRow};
use hostwatch::net::mux::EndpointMux;
use hostwatch::probes::watchdog;

fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(25));
    }
}

fn count_lines(aggregator: &Aggregator, needle: &str) -> usize {
    aggregator.snapshot().log.iter().filter(|l| l.contains(needle)).count()
}

#[test]
fn ok_ok_bad_yields_one_transition_and_one_rescue() {
    let aggregator = Aggregator::new(HashMap::new());
    let ctx = PluginContext { aggregator: Arc::clone(&aggregator), mux: EndpointMux::new() };

    let params = Params::merged(
        &watchdog::meta().default_params,
        &r#"
            watch_source = "ping"
            rescue_command = "true"
            recheck_after_sec = 0.0
            cooldown_sec = 60.0
            poll_every_sec = 0.05
        "#
        .parse()
        .unwrap(),
    );
    let probe = watchdog::create(&ctx, "db1", params).unwrap();
    probe.start().unwrap();

    let write = |severity: Severity| {
        aggregator.write_status("db1", StatusRow::new("ping", "PING", severity, 1.0));
    };

    // Baseline, then a repeat that must not count as a transition.
    write(Severity::Ok);
    std::thread::sleep(Duration::from_millis(500));
    write(Severity::Ok);
    std::thread::sleep(Duration::from_millis(500));

    write(Severity::Bad);
    wait_for("transition line", || count_lines(&aggregator, "ok -> bad") >= 1);
    wait_for("rescue line", || count_lines(&aggregator, "running rescue") >= 1);
    wait_for("rescue exit line", || count_lines(&aggregator, "rescue exited rc=0") >= 1);

    // Steady bad afterwards: nothing new.
    write(Severity::Bad);
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(count_lines(&aggregator, "ok -> bad"), 1);
    assert_eq!(count_lines(&aggregator, "running rescue"), 1);

    probe.stop();
}
