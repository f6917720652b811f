use reconcile::mock::MockBackend;
use reconcile::{
    ActionKind, ActionOutcome, Advisory, AutoConfirm, AutoDecline, BackendId, BoxedBackend,
    CancelToken, Capabilities, ConfirmCallback, ConfirmRequest, ConfirmScope, DesiredState,
    GroupKind, Mode, NoProgress, OverallStatus, PackageRef, ResultReport, Session,
    SessionOptions,
};

fn apply_options() -> SessionOptions {
    SessionOptions {
        mode: Mode::Apply { assume_yes: true },
        ..SessionOptions::default()
    }
}

fn run(backends: Vec<BoxedBackend>, options: SessionOptions, desired: &DesiredState) -> ResultReport {
    Session::new(backends, options)
        .run(desired, &mut AutoConfirm, &NoProgress)
        .unwrap()
}

fn outcomes(report: &ResultReport) -> Vec<(ActionKind, String, ActionOutcome)> {
    report
        .entries
        .iter()
        .map(|e| (e.action.kind, e.action.package.name.clone(), e.outcome.clone()))
        .collect()
}

fn scenario_a() -> (MockBackend, DesiredState) {
    let mock = MockBackend::new("pacman").with_installed(&["bar"]);
    let mut desired = DesiredState::new();
    desired
        .require(PackageRef::new("pacman", "foo"))
        .require(PackageRef::new("pacman", "bar"));
    (mock, desired)
}

#[test]
fn scenario_a_installs_missing_and_pins_dependency() {
    let (mock, desired) = scenario_a();
    let handle = mock.handle();

    let report = run(vec![Box::new(mock)], apply_options(), &desired);

    assert_eq!(
        outcomes(&report),
        vec![
            (ActionKind::Install, "foo".into(), ActionOutcome::Applied),
            (ActionKind::MarkExplicit, "bar".into(), ActionOutcome::Applied),
        ]
    );
    assert_eq!(report.status(), OverallStatus::FullySucceeded);
    assert!(handle.explicit().contains("foo"));
    assert!(handle.explicit().contains("bar"));
}

#[test]
fn scenario_b_removes_excluded() {
    let mock = MockBackend::new("pacman").with_installed(&["baz"]);
    let handle = mock.handle();
    let mut desired = DesiredState::new();
    desired.exclude(PackageRef::new("pacman", "baz"));

    let report = run(vec![Box::new(mock)], apply_options(), &desired);

    assert_eq!(
        outcomes(&report),
        vec![(ActionKind::Remove, "baz".into(), ActionOutcome::Applied)]
    );
    assert!(handle.installed().is_empty());
}

#[test]
fn scenario_c_dry_run_changes_nothing() {
    let (mock, desired) = scenario_a();
    let handle = mock.handle();
    let before = handle.installed();

    let report = run(vec![Box::new(mock)], SessionOptions::default(), &desired);

    assert_eq!(report.entries.len(), 2);
    assert!(
        report
            .entries
            .iter()
            .all(|e| e.outcome == ActionOutcome::skipped("dry-run"))
    );
    assert_eq!(report.status(), OverallStatus::FullySucceeded);
    assert!(handle.mutations().is_empty());
    assert_eq!(handle.installed(), before);
}

#[test]
fn scenario_d_timed_out_backend_is_degraded() {
    let pacman = MockBackend::new("pacman");
    let pacman_handle = pacman.handle();
    let brew = MockBackend::new("brew").timing_out();
    let brew_handle = brew.handle();

    let mut desired = DesiredState::new();
    desired
        .require(PackageRef::new("pacman", "git"))
        .require(PackageRef::new("brew", "jq"));

    let report = run(
        vec![Box::new(pacman), Box::new(brew)],
        apply_options(),
        &desired,
    );

    assert!(report.advisories.iter().any(|a| matches!(
        a,
        Advisory::BackendUnavailable { backend, .. } if backend.as_str() == "brew"
    )));
    assert!(
        report
            .entries
            .iter()
            .all(|e| e.action.backend().as_str() == "pacman")
    );
    assert_eq!(
        outcomes(&report),
        vec![(ActionKind::Install, "git".into(), ActionOutcome::Applied)]
    );
    assert!(pacman_handle.installed().contains("git"));
    assert!(brew_handle.mutations().is_empty());
    assert_eq!(report.status(), OverallStatus::PartiallyFailed);
}

#[test]
fn partial_failure_is_isolated() {
    let mock = MockBackend::new("pacman").failing("two");
    let handle = mock.handle();
    let mut desired = DesiredState::new();
    for name in ["one", "two", "three"] {
        desired.require(PackageRef::new("pacman", name));
    }

    let report = run(vec![Box::new(mock)], apply_options(), &desired);

    let by_name = |name: &str| {
        report
            .entries
            .iter()
            .find(|e| e.action.package.name == name)
            .map(|e| e.outcome.clone())
            .unwrap()
    };
    assert_eq!(by_name("one"), ActionOutcome::Applied);
    assert_eq!(by_name("three"), ActionOutcome::Applied);
    assert!(matches!(by_name("two"), ActionOutcome::Failed { .. }));
    assert_eq!(report.status(), OverallStatus::PartiallyFailed);
    assert_eq!(report.status().exit_code(), 1);
    assert!(!handle.installed().contains("two"));
}

#[test]
fn conflicting_desired_state_aborts_before_any_call() {
    let mock = MockBackend::new("pacman").with_installed(&["vim"]);
    let handle = mock.handle();
    let mut desired = DesiredState::new();
    desired
        .require(PackageRef::new("pacman", "vim"))
        .exclude(PackageRef::new("pacman", "vim"));

    let report = run(vec![Box::new(mock)], apply_options(), &desired);

    assert_eq!(report.status(), OverallStatus::Aborted);
    assert!(report.entries.is_empty());
    assert!(
        report
            .abort_reason
            .as_deref()
            .is_some_and(|r| r.contains("pacman/vim"))
    );
    assert!(handle.calls().is_empty());
}

#[test]
fn strict_mode_aborts_on_unavailable_backend() {
    let pacman = MockBackend::new("pacman");
    let pacman_handle = pacman.handle();
    let mut desired = DesiredState::new();
    desired.require(PackageRef::new("pacman", "git"));

    let options = SessionOptions {
        strict: true,
        ..apply_options()
    };
    let report = run(
        vec![Box::new(pacman), Box::new(MockBackend::new("snap").unavailable())],
        options,
        &desired,
    );

    assert_eq!(report.status(), OverallStatus::Aborted);
    assert_eq!(report.status().exit_code(), 2);
    assert_eq!(report.advisories.len(), 1);
    assert!(pacman_handle.mutations().is_empty());
}

#[test]
fn lost_connectivity_fails_rest_of_backend_only() {
    let pacman = MockBackend::new("pacman")
        .with_installed(&["bar", "baz"])
        .disconnect_after(1);
    let pacman_handle = pacman.handle();
    let brew = MockBackend::new("brew");

    let mut desired = DesiredState::new();
    desired
        .require(PackageRef::new("pacman", "foo"))
        .require(PackageRef::new("pacman", "bar"))
        .exclude(PackageRef::new("pacman", "baz"))
        .require(PackageRef::new("brew", "jq"));

    let report = run(
        vec![Box::new(pacman), Box::new(brew)],
        apply_options(),
        &desired,
    );

    assert_eq!(
        outcomes(&report),
        vec![
            (ActionKind::Install, "jq".into(), ActionOutcome::Applied),
            (ActionKind::Install, "foo".into(), ActionOutcome::Applied),
            (
                ActionKind::MarkExplicit,
                "bar".into(),
                ActionOutcome::failed("backend 'pacman' unavailable: connection lost")
            ),
            (
                ActionKind::Remove,
                "baz".into(),
                ActionOutcome::failed("backend 'pacman' unavailable: connection lost")
            ),
        ]
    );
    assert!(
        !pacman_handle
            .mutations()
            .iter()
            .any(|c| c.starts_with("remove"))
    );
    assert_eq!(report.status(), OverallStatus::PartiallyFailed);
}

#[test]
fn cancellation_lets_in_flight_call_finish() {
    let cancel = CancelToken::new();
    let mock = MockBackend::new("pacman")
        .with_installed(&["nano"])
        .cancel_on_mutation(cancel.clone());
    let handle = mock.handle();

    let mut desired = DesiredState::new();
    desired
        .require(PackageRef::new("pacman", "vim"))
        .exclude(PackageRef::new("pacman", "nano"));

    let report = Session::new(vec![Box::new(mock)], apply_options())
        .with_cancel(cancel)
        .run(&desired, &mut AutoConfirm, &NoProgress)
        .unwrap();

    assert_eq!(
        outcomes(&report),
        vec![
            (ActionKind::Install, "vim".into(), ActionOutcome::Applied),
            (ActionKind::Remove, "nano".into(), ActionOutcome::skipped("cancelled")),
        ]
    );
    assert!(report.cancelled);
    assert_eq!(report.status(), OverallStatus::Aborted);
    assert!(handle.installed().contains("nano"));
}

#[test]
fn declining_skips_without_mutation() {
    let (mock, desired) = scenario_a();
    let handle = mock.handle();
    let options = SessionOptions {
        mode: Mode::Apply { assume_yes: false },
        ..SessionOptions::default()
    };

    let report = Session::new(vec![Box::new(mock)], options)
        .run(&desired, &mut AutoDecline, &NoProgress)
        .unwrap();

    assert!(
        report
            .entries
            .iter()
            .all(|e| e.outcome == ActionOutcome::skipped("declined"))
    );
    assert_eq!(report.status(), OverallStatus::FullySucceeded);
    assert!(handle.mutations().is_empty());
}

#[test]
fn paranoid_mode_confirms_each_group() {
    struct Record(Vec<ConfirmScope>);

    impl ConfirmCallback for Record {
        fn confirm(&mut self, request: &ConfirmRequest<'_>) -> reconcile::Result<bool> {
            self.0.push(request.scope.clone());
            Ok(true)
        }
    }

    let (mock, desired) = scenario_a();
    let options = SessionOptions {
        mode: Mode::Apply { assume_yes: false },
        paranoid: true,
        ..SessionOptions::default()
    };
    let mut record = Record(Vec::new());

    Session::new(vec![Box::new(mock)], options)
        .run(&desired, &mut record, &NoProgress)
        .unwrap();

    let pacman = BackendId::new("pacman");
    assert_eq!(
        record.0,
        vec![
            ConfirmScope::Group {
                backend: pacman.clone(),
                kind: GroupKind::Install
            },
            ConfirmScope::Group {
                backend: pacman,
                kind: GroupKind::Metadata
            },
        ]
    );
}

#[test]
fn reapplying_yields_empty_plan() {
    let mock = MockBackend::new("pacman")
        .with_installed(&["bar", "baz"])
        .with_explicit(&["htop"]);
    let mut desired = DesiredState::new();
    desired
        .require(PackageRef::new("pacman", "foo"))
        .require(PackageRef::new("pacman", "bar"))
        .exclude(PackageRef::new("pacman", "baz"));

    let session = Session::new(vec![Box::new(mock)], apply_options());
    let report = session.run(&desired, &mut AutoConfirm, &NoProgress).unwrap();
    assert_eq!(report.summary().total_changes(), 3);
    assert!(
        !report
            .advisories
            .iter()
            .any(|a| matches!(a, Advisory::NotConverged { .. }))
    );

    let plan = session.plan(&desired, &NoProgress).unwrap();
    assert!(plan.is_empty());
    assert_eq!(
        plan.advisories,
        vec![Advisory::Untracked {
            package: PackageRef::new("pacman", "htop")
        }]
    );
}

#[test]
fn unconverged_action_is_flagged() {
    let mock = MockBackend::new("pacman")
        .with_installed(&["bar"])
        .ignoring_marks();
    let mut desired = DesiredState::new();
    desired.require(PackageRef::new("pacman", "bar"));

    let report = run(vec![Box::new(mock)], apply_options(), &desired);

    assert_eq!(report.entries[0].outcome, ActionOutcome::Applied);
    assert!(report.advisories.iter().any(|a| matches!(
        a,
        Advisory::NotConverged { action } if action.kind == ActionKind::MarkExplicit
    )));
}

#[test]
fn untracked_packages_are_never_removed() {
    let mock = MockBackend::new("pacman").with_explicit(&["htop", "git"]);
    let handle = mock.handle();
    let mut desired = DesiredState::new();
    desired.require(PackageRef::new("pacman", "git"));

    let report = run(vec![Box::new(mock)], apply_options(), &desired);

    assert!(report.entries.is_empty());
    assert_eq!(report.untracked().count(), 1);
    assert!(handle.installed().contains("htop"));
}

#[test]
fn demote_untracked_marks_implicit() {
    let mock = MockBackend::new("pacman").with_explicit(&["htop"]);
    let handle = mock.handle();
    let options = SessionOptions {
        demote_untracked: true,
        ..apply_options()
    };

    let report = run(vec![Box::new(mock)], options, &DesiredState::new());

    assert_eq!(
        outcomes(&report),
        vec![(ActionKind::MarkImplicit, "htop".into(), ActionOutcome::Applied)]
    );
    assert!(handle.installed().contains("htop"));
    assert!(!handle.explicit().contains("htop"));
}

#[test]
fn backend_without_explicit_tracking_treats_all_as_explicit() {
    let caps = Capabilities {
        explicit_tracking: false,
        ..Capabilities::default()
    };
    let mock = MockBackend::new("fisher")
        .with_installed(&["jorgebucaran/fisher", "ilancosman/tide"])
        .with_capabilities(caps);
    let mut desired = DesiredState::new();
    desired.require(PackageRef::new("fisher", "jorgebucaran/fisher"));

    let report = run(vec![Box::new(mock)], apply_options(), &desired);

    assert!(report.entries.is_empty());
    assert_eq!(report.untracked().count(), 1);
}

#[test]
fn target_filter_limits_plan() {
    let pacman = MockBackend::new("pacman");
    let brew = MockBackend::new("brew");
    let brew_handle = brew.handle();
    let mut desired = DesiredState::new();
    desired
        .require(PackageRef::new("pacman", "git"))
        .require(PackageRef::new("brew", "jq"));

    let options = SessionOptions {
        target: Some("pacman".into()),
        ..apply_options()
    };
    let report = run(vec![Box::new(pacman), Box::new(brew)], options, &desired);

    assert_eq!(
        outcomes(&report),
        vec![(ActionKind::Install, "git".into(), ActionOutcome::Applied)]
    );
    assert!(brew_handle.mutations().is_empty());
}
