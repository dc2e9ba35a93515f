use procmod::dsl::builder::ProcessBuilder;
use procmod::dsl::ActivityType;
use serde_json::json;

#[test]
fn test_build_linear_process() {
    let process = ProcessBuilder::new("linear-flow")
        .name("Linear flow")
        .body(|b| {
            b.start_event("start")
                .task("review")
                .named("Review order")
                .input("approved", false)
                .async_before()
                .end_event("end")
                .connect("start", "review")
                .connect_with_id("done", "review", "end")
        })
        .build();

    assert_eq!(process.id, "linear-flow");
    assert_eq!(process.name.as_deref(), Some("Linear flow"));
    assert_eq!(process.version, 1);
    assert_eq!(process.activities.len(), 3);
    assert_eq!(process.flows.len(), 2);

    // 检查 review 活动
    let review = process.activities.iter().find(|a| a.id == "review").expect("Activity not found");
    assert_eq!(review.kind, ActivityType::Task);
    assert_eq!(review.name.as_deref(), Some("Review order"));
    assert_eq!(review.inputs.get("approved"), Some(&json!(false)));
    assert!(review.async_before);
    assert!(!review.scope);

    assert_eq!(process.flows[0].id, "start_review");
    assert_eq!(process.flows[1].id, "done");
}

#[test]
fn test_build_nested_process() {
    let process = ProcessBuilder::new("nested-flow")
        .version(2)
        .body(|b| {
            b.start_event("start")
                .sub_process("sub", |b| {
                    b.start_event("subStart")
                        .task("inner")
                        .scope()
                        .connect("subStart", "inner")
                })
                .boundary_event("timer", "sub", false)
                .connect("start", "sub")
        })
        .build();

    assert_eq!(process.version, 2);
    // 子流程的顺序流提升到流程级别
    assert_eq!(process.flows.len(), 2);

    let sub = process.activities.iter().find(|a| a.id == "sub").expect("sub");
    let nested = sub.nested_activities().expect("sub-process body");
    assert_eq!(nested.len(), 2);
    assert!(nested[1].scope);

    let timer = process.activities.iter().find(|a| a.id == "timer").expect("timer");
    match &timer.kind {
        ActivityType::BoundaryEvent { attached_to, cancel_activity, compensation } => {
            assert_eq!(attached_to, "sub");
            assert!(!cancel_activity);
            assert!(!compensation);
        }
        other => panic!("unexpected kind {:?}", other),
    }
}
