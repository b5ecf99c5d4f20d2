// Integration coverage for variant mutation, digest caching, and
// determinism of port rotation (§8 scenario 6).

use faultloc_core::ast::{Decl, Expr, Function, Loc, Program, Stmt, StmtKind};
use faultloc_core::cache::{CachedOutcome, Lookup, TestCache};
use faultloc_core::id::Sid;
use faultloc_core::instrument::StatementMap;
use faultloc_core::localization::LocalizedWeights;
use faultloc_core::variant::{
    CompileCache, Mutation, PortAllocator, ProgramVariant, Variant, PORT_RANGE_END, PORT_RANGE_START,
};

fn loc() -> Loc {
    Loc { file: "t.c".into(), line: 1, byte: 0 }
}

fn stmt(sid: u32, kind: StmtKind) -> Stmt {
    Stmt { sid: Sid(sid), labels: vec![], kind, loc: loc() }
}

fn sample() -> (Program, StatementMap) {
    let body = vec![
        stmt(1, StmtKind::Return(Some(Expr::IntLit(1)))),
        stmt(2, StmtKind::Return(Some(Expr::IntLit(2)))),
    ];
    let mut map = StatementMap::new();
    map.insert(Sid(1), StmtKind::Return(Some(Expr::IntLit(1))));
    map.insert(Sid(2), StmtKind::Return(Some(Expr::IntLit(2))));
    (
        Program {
            decls: vec![Decl::Function(Function { name: "main".into(), params: vec![], body })],
        },
        map,
    )
}

#[test]
fn identical_variants_share_a_cache_entry() {
    let (program, map) = sample();
    let v1 = ProgramVariant::new(program.clone(), map.clone(), LocalizedWeights::default());
    let v2 = ProgramVariant::new(program, map, LocalizedWeights::default());

    let path = std::env::temp_dir().join(format!("flc-it-cache-{}.bin", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let mut cache = TestCache::open(&path, 10).unwrap();

    assert!(matches!(v1.lookup_test(&mut cache, "t1"), Lookup::MustRun));
    v1.record_test(&mut cache, "t1", CachedOutcome { passed: true, fitness: vec![1.0] });
    match v2.lookup_test(&mut cache, "t1") {
        Lookup::Hit(o) => assert!(o.passed),
        Lookup::MustRun => panic!("identical variants must share a cache entry"),
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn mutated_variant_is_a_distinct_cache_entry() {
    let (program, map) = sample();
    let v1 = ProgramVariant::new(program, map, LocalizedWeights::default());
    let v2 = v1.apply(Mutation::Delete { target: Sid(1) }).unwrap();

    let path = std::env::temp_dir().join(format!("flc-it-cache-mut-{}.bin", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let mut cache = TestCache::open(&path, 10).unwrap();

    v1.record_test(&mut cache, "t1", CachedOutcome { passed: true, fitness: vec![1.0] });
    assert!(matches!(v2.lookup_test(&mut cache, "t1"), Lookup::MustRun));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn chained_mutations_remain_reproducible_from_the_same_start() {
    let (program, map) = sample();
    let build = || ProgramVariant::new(program.clone(), map.clone(), LocalizedWeights::default());

    let a = build()
        .apply(Mutation::Swap { a: Sid(1), b: Sid(2) })
        .unwrap()
        .apply(Mutation::Delete { target: Sid(1) })
        .unwrap();
    let b = build()
        .apply(Mutation::Swap { a: Sid(1), b: Sid(2) })
        .unwrap()
        .apply(Mutation::Delete { target: Sid(1) })
        .unwrap();

    assert_eq!(a.digest(), b.digest());
}

#[test]
fn port_rotation_range_is_bounded_and_nonempty() {
    assert!(PORT_RANGE_START < PORT_RANGE_END);

    let mut ports = PortAllocator::new();
    let first = ports.next_port();
    assert!((PORT_RANGE_START..PORT_RANGE_END).contains(&first));
    for _ in 0..(PORT_RANGE_END - PORT_RANGE_START) {
        let p = ports.next_port();
        assert!((PORT_RANGE_START..PORT_RANGE_END).contains(&p));
    }
}
