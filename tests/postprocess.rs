use quic_interop_runner::interop::{auto_downgrade, Matrix};
use quic_interop_runner::result::TestResult;
use std::collections::HashSet;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Three servers, two clients, one test failing everywhere: the whole
/// slice is rewritten to unsupported.
#[test]
fn universally_failed_test_becomes_unsupported() {
    let servers = names(&["s1", "s2", "s3"]);
    let clients = names(&["c1", "c2"]);
    let mut matrix = Matrix::default();
    for server in &servers {
        for client in &clients {
            matrix.set_test(server, client, "chacha20", TestResult::Failed);
            matrix.set_test(server, client, "handshake", TestResult::Succeeded);
        }
    }

    auto_downgrade(
        &mut matrix,
        &servers,
        &clients,
        &["chacha20", "handshake"],
        &HashSet::new(),
    );

    for server in &servers {
        for client in &clients {
            assert_eq!(
                matrix.test(server, client, "chacha20"),
                Some(TestResult::Unsupported)
            );
            // A passing test is never touched.
            assert_eq!(
                matrix.test(server, client, "handshake"),
                Some(TestResult::Succeeded)
            );
        }
    }
}

/// With a single server there is no evidence against anyone; nothing is
/// rewritten.
#[test]
fn single_server_runs_are_left_alone() {
    let servers = names(&["s1"]);
    let clients = names(&["c1", "c2"]);
    let mut matrix = Matrix::default();
    for client in &clients {
        matrix.set_test("s1", client, "chacha20", TestResult::Failed);
    }

    auto_downgrade(
        &mut matrix,
        &servers,
        &clients,
        &["chacha20"],
        &HashSet::new(),
    );

    for client in &clients {
        assert_eq!(
            matrix.test("s1", client, "chacha20"),
            Some(TestResult::Failed)
        );
    }
}

/// A mix of failed and unsupported across the axis still downgrades; one
/// success anywhere protects the whole slice.
#[test]
fn mixed_negative_verdicts_downgrade_but_success_protects() {
    let servers = names(&["s1", "s2"]);
    let clients = names(&["c1", "c2"]);
    let mut matrix = Matrix::default();
    matrix.set_test("s1", "c1", "ecn", TestResult::Failed);
    matrix.set_test("s2", "c1", "ecn", TestResult::Unsupported);
    matrix.set_test("s1", "c2", "ecn", TestResult::Succeeded);
    matrix.set_test("s2", "c2", "ecn", TestResult::Failed);

    auto_downgrade(&mut matrix, &servers, &clients, &["ecn"], &HashSet::new());

    // c1 lost everywhere: both cells unsupported now.
    assert_eq!(matrix.test("s1", "c1", "ecn"), Some(TestResult::Unsupported));
    assert_eq!(matrix.test("s2", "c1", "ecn"), Some(TestResult::Unsupported));
    // c2's success against s1 protects its row, but s2 has no success
    // against any client, so the server-axis rule downgrades its column.
    assert_eq!(matrix.test("s1", "c2", "ecn"), Some(TestResult::Succeeded));
    assert_eq!(matrix.test("s2", "c2", "ecn"), Some(TestResult::Unsupported));
}

/// The server axis is folded symmetrically.
#[test]
fn failing_server_column_is_downgraded() {
    let servers = names(&["s1", "s2"]);
    let clients = names(&["c1", "c2"]);
    let mut matrix = Matrix::default();
    // s1 fails with every client; s2 passes with c1.
    matrix.set_test("s1", "c1", "retry", TestResult::Failed);
    matrix.set_test("s1", "c2", "retry", TestResult::Failed);
    matrix.set_test("s2", "c1", "retry", TestResult::Succeeded);
    matrix.set_test("s2", "c2", "retry", TestResult::Failed);

    auto_downgrade(&mut matrix, &servers, &clients, &["retry"], &HashSet::new());

    // s1's column goes, and so does c2's row: c2 failed against both
    // servers, which downgrades its s2 cell too. Only the success survives.
    assert_eq!(matrix.test("s1", "c1", "retry"), Some(TestResult::Unsupported));
    assert_eq!(matrix.test("s1", "c2", "retry"), Some(TestResult::Unsupported));
    assert_eq!(matrix.test("s2", "c1", "retry"), Some(TestResult::Succeeded));
    assert_eq!(matrix.test("s2", "c2", "retry"), Some(TestResult::Unsupported));
}

/// Exit status counting happens after post-processing, so downgraded cells
/// no longer count as failures.
#[test]
fn downgraded_cells_leave_the_failure_count() {
    let servers = names(&["s1", "s2"]);
    let clients = names(&["c1", "c2"]);
    let mut matrix = Matrix::default();
    for server in &servers {
        for client in &clients {
            matrix.set_test(server, client, "zerortt", TestResult::Failed);
        }
    }
    assert_eq!(matrix.failed_count(), 4);

    auto_downgrade(&mut matrix, &servers, &clients, &["zerortt"], &HashSet::new());
    assert_eq!(matrix.failed_count(), 0);
}
