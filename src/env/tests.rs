//! End-to-end scenarios over the environment API.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use super::*;
use crate::context::NamedContext;
use crate::declarations::{
  AbstractUniverses, ConstantEntry, ModuleExpr, MutualInductiveEntry, OneInductiveEntry,
  UniverseEntry,
};
use crate::error::Anomaly;
use crate::expr::Expr;
use crate::kernel::TypeChecker;
use crate::names::Ident;
use crate::univ::{ConstraintKind, UnivVar};

fn init_tracing() {
  // Several tests race to install the subscriber; only the first wins.
  let _ = tracing_subscriber::registry()
    .with(fmt::layer().with_test_writer())
    .with(EnvFilter::from_default_env())
    .try_init();
}

fn lib(name: &str) -> Environment {
  init_tracing();
  Environment::new(DirPath::new(&["Test", name]))
}

fn l(s: &str) -> Label {
  Label::new(s)
}

fn id(s: &str) -> Ident {
  Ident::new(s)
}

fn cnst(kn: &KerName) -> Expr {
  Expr::cnst(kn.clone(), vec![])
}

fn param(env: &Environment, label: &str, ty: Expr) -> (KerName, Environment) {
  env.add_constant(l(label), ConstantEntry::parameter(ty)).unwrap()
}

fn def(env: &Environment, label: &str, body: Expr) -> (KerName, Environment) {
  env.add_constant(l(label), ConstantEntry::definition(body)).unwrap()
}

struct Nat {
  ty: Expr,
  zero: Expr,
  succ: Expr,
}

fn add_nat(env: &Environment) -> (Nat, Environment) {
  let nat = Expr::var(id("Nat"));
  let entry = MutualInductiveEntry {
    params: vec![],
    packets: vec![OneInductiveEntry {
      label: l("Nat"),
      arity: Expr::type0(),
      ctors: vec![(l("zero"), nat.clone()), (l("succ"), Expr::arrow(nat.clone(), nat))],
    }],
    universes: UniverseEntry::default(),
  };
  let (kn, env) = env.add_mind(entry).unwrap();
  let ind = IndRef { mind: kn, idx: 0 };
  let nat = Nat {
    ty: Expr::ind(ind.clone(), vec![]),
    zero: Expr::construct(CtorRef { ind: ind.clone(), idx: 0 }, vec![]),
    succ: Expr::construct(CtorRef { ind, idx: 1 }, vec![]),
  };
  (nat, env)
}

// ============================================================================
// Sections
// ============================================================================

#[test]
fn discharge_matches_the_generalized_constant() {
  let (nat, base) = add_nat(&lib("Disc"));
  let n = id("n");
  let in_section = base.open_section().push_named_assum(n.clone(), nat.ty.clone()).unwrap();
  let body = Expr::app(nat.succ.clone(), Expr::var(n.clone()));
  let (kn, in_section) = def(&in_section, "succ_of_n", body.clone());
  assert_eq!(in_section.lookup_constant(&kn).unwrap().ty, nat.ty);
  let closed = in_section.close_section().unwrap();

  let binders = [(n, nat.ty.clone())];
  let ty = Expr::pis(&binders, nat.ty.clone());
  assert_eq!(closed.lookup_constant(&kn).unwrap().ty, ty);
  let entry = ConstantEntry::typed_definition(Expr::lams(&binders, body), ty);
  let (_, direct) = base.add_constant(l("succ_of_n"), entry).unwrap();
  assert_eq!(closed.export().unwrap().to_bytes(), direct.export().unwrap().to_bytes());
}

#[test]
fn later_fields_are_applied_to_discharged_variables() {
  let (nat, base) = add_nat(&lib("Apply"));
  let n = id("n");
  let env = base.open_section().push_named_assum(n.clone(), nat.ty.clone()).unwrap();
  let (same, env) = def(&env, "same", Expr::var(n.clone()));
  let (next, env) = def(&env, "next", Expr::app(nat.succ.clone(), cnst(&same)));
  let env = env.close_section().unwrap();
  // `next` uses `n` only through `same`, and still abstracts it.
  let next = env.lookup_constant(&next).unwrap();
  let binders = [(n.clone(), nat.ty.clone())];
  let expected = Expr::app(nat.succ, Expr::app(cnst(&same), Expr::var(n)));
  assert_eq!(next.body(), Some(&Expr::lams(&binders, expected)));
}

#[test]
fn inductives_take_section_variables_as_parameters() {
  let env = lib("Opt").open_section().push_named_assum(id("A"), Expr::type0()).unwrap();
  let opt = Expr::var(id("Opt"));
  let entry = MutualInductiveEntry {
    params: vec![],
    packets: vec![OneInductiveEntry {
      label: l("Opt"),
      arity: Expr::type0(),
      ctors: vec![
        (l("none"), opt.clone()),
        (l("some"), Expr::arrow(Expr::var(id("A")), opt)),
      ],
    }],
    universes: UniverseEntry::default(),
  };
  let (kn, env) = env.add_mind(entry).unwrap();
  let ind = IndRef { mind: kn.clone(), idx: 0 };
  let none = Expr::construct(CtorRef { ind: ind.clone(), idx: 0 }, vec![]);
  let (dflt, env) = def(&env, "dflt", none);
  let env = env.close_section().unwrap();

  let mind = env.lookup_mind(&kn).unwrap();
  assert_eq!(mind.params, vec![(id("A"), Expr::type0())]);
  assert_eq!(mind.packets[0].ctors.len(), 2);
  let binders = [(id("A"), Expr::type0())];
  let applied = Expr::app(Expr::ind(ind, vec![]), Expr::var(id("A")));
  assert_eq!(env.lookup_constant(&dflt).unwrap().ty, Expr::pis(&binders, applied));
}

#[test]
fn section_universes_survive_the_close() {
  let u = UnivVar::new("u");
  let env = lib("Univ").open_section();
  let env = env.add_universes(&ContextSet::of_univs([u.clone()])).unwrap();
  let (kn, env) = param(&env, "T", Expr::sort(Level::var(u.clone())));
  let env = env.close_section().unwrap();
  assert!(env.universes().univs.contains(&u));
  assert!(env.lookup_constant(&kn).is_some());
  // Declaring it again is a strict redeclaration.
  assert!(env.add_universes(&ContextSet::of_univs([u])).is_err());
}

#[test]
fn nested_sections_discharge_their_own_variables() {
  let env = lib("Nest").open_section().push_named_assum(id("A"), Expr::type0()).unwrap();
  let env = env.open_section().push_named_assum(id("a"), Expr::var(id("A"))).unwrap();
  let (kn, env) = def(&env, "it", Expr::var(id("a")));
  let env = env.close_section().unwrap();
  assert_eq!(env.named_context().len(), 1);
  let inner = env.lookup_constant(&kn).unwrap().ty.clone();
  assert_eq!(inner, Expr::pi(id("a"), Expr::var(id("A")), Expr::var(id("A"))));
  let env = env.close_section().unwrap();
  let outer = Expr::pis(
    &[(id("A"), Expr::type0())],
    Expr::pi(id("a"), Expr::var(id("A")), Expr::var(id("A"))),
  );
  assert_eq!(env.lookup_constant(&kn).unwrap().ty, outer);
}

#[test]
fn flags_are_fixed_inside_sections() {
  let env = lib("Flags").open_section();
  let flags = TypingFlags::default().with_rewrite_rules();
  assert_eq!(env.set_typing_flags(flags).unwrap_err(), KernelError::FlagsInSection);
  let env = env.close_section().unwrap();
  assert_eq!(env.set_typing_flags(flags).unwrap().flags(), &flags);
}

// ============================================================================
// Labels
// ============================================================================

#[test]
fn labels_are_unique_across_field_kinds() {
  let (_, env) = param(&lib("Labels"), "M", Expr::type0());
  assert_eq!(env.start_module(l("M")).unwrap_err(), KernelError::DuplicateLabel(l("M")));
  let (_, sig) = env.start_modtype(l("S")).unwrap();
  let (_, env) = sig.end_modtype().unwrap();
  let err = env.add_constant(l("S"), ConstantEntry::parameter(Expr::type0())).unwrap_err();
  assert_eq!(err, KernelError::DuplicateLabel(l("S")));
  let (_, env) = add_nat(&env);
  let err = env.add_constant(l("succ"), ConstantEntry::definition(Expr::prop())).unwrap_err();
  assert_eq!(err, KernelError::DuplicateLabel(l("succ")));
}

#[test]
fn failed_operations_leave_the_environment_alone() {
  let (_, env) = param(&lib("Pure"), "T", Expr::type0());
  let before = env.structure().clone();
  let bad = ConstantEntry::typed_definition(Expr::type0(), Expr::type0());
  assert!(env.add_constant(l("bad"), bad).is_err());
  assert!(env.structure().ptr_eq(&before));
  assert!(!env.has_label(&l("bad")));
}

// ============================================================================
// Side effects
// ============================================================================

#[test]
fn side_effects_export_in_dependency_order() {
  let (_, base) = param(&lib("Eff"), "T", Expr::type0());
  let (a, scratch) = base.side_effect(l("a"), ConstantEntry::definition(Expr::prop())).unwrap();
  let (b, _) = scratch.side_effect(l("b"), ConstantEntry::definition(cnst(a.name()))).unwrap();
  assert!(!scratch.has_label(&l("a")));
  let (names, env) = base.export_side_effects(vec![b.clone(), a.clone()]).unwrap();
  assert_eq!(names, vec![a.name().clone(), b.name().clone()]);
  assert!(env.has_label(&l("a")) && env.has_label(&l("b")));
  assert_eq!(env.structure().len(), base.structure().len() + 2);
}

#[test]
fn stale_certificates_fall_back_to_checking() {
  let (_, base) = param(&lib("Fall"), "T", Expr::type0());
  let (_, left) = param(&base, "x", Expr::type0());
  let (_, right) = param(&base, "y", Expr::type0());

  let (a, scratch) = left.side_effect(l("a"), ConstantEntry::definition(Expr::prop())).unwrap();
  let (b, _) = scratch.side_effect(l("b"), ConstantEntry::definition(cnst(a.name()))).unwrap();
  assert!(right.check_signatures(&[&a.certificate, &b.certificate]).is_none());
  let (_, checked) = right.export_side_effects(vec![a, b]).unwrap();

  let (a, scratch) = right.side_effect(l("a"), ConstantEntry::definition(Expr::prop())).unwrap();
  let (b, _) = scratch.side_effect(l("b"), ConstantEntry::definition(cnst(a.name()))).unwrap();
  let (_, trusted) = right.export_side_effects(vec![a, b]).unwrap();

  assert_eq!(checked.export().unwrap().to_bytes(), trusted.export().unwrap().to_bytes());
}

#[test]
fn a_rejected_side_effect_rejects_the_batch() {
  let (_, base) = param(&lib("Batch"), "T", Expr::type0());
  let (x, left) = param(&base, "x", Expr::type0());
  let (_, right) = param(&base, "y", Expr::type0());
  let (ok, _) = left.side_effect(l("ok"), ConstantEntry::definition(Expr::prop())).unwrap();
  let (uses_x, _) = left.side_effect(l("uses_x"), ConstantEntry::definition(cnst(&x))).unwrap();

  let err = right.export_side_effects(vec![ok.clone(), uses_x.clone()]).unwrap_err();
  match err {
    KernelError::SideEffectRejected { name, .. } => assert_eq!(&name, uses_x.name()),
    other => panic!("unexpected error {other:?}"),
  }
  assert!(right.lookup_constant(ok.name()).is_none());
  assert!(!right.has_label(&l("ok")));
}

#[test]
fn section_side_effects_stay_in_their_section() {
  let base = lib("Leak");
  let x = id("x");
  let inner = base.open_section().push_named_assum(x.clone(), Expr::type0()).unwrap();
  let entry = ConstantEntry::definition(Expr::var(x.clone()));
  let (leak, _) = inner.side_effect(l("leak"), entry).unwrap();

  // The structure is unchanged by the section, but its variable is not in scope.
  assert!(base.check_signatures(&[&leak.certificate]).is_none());
  let err = base.export_side_effects(vec![leak.clone()]).unwrap_err();
  assert!(matches!(err, KernelError::SideEffectRejected { .. }));
  assert!(!base.has_label(&l("leak")));
  let other = base.open_section().push_named_assum(id("y"), Expr::type0()).unwrap();
  assert!(other.check_signatures(&[&leak.certificate]).is_none());

  assert!(inner.check_signatures(&[&leak.certificate]).is_some());
  let (names, env) = inner.export_side_effects(vec![leak]).unwrap();
  let env = env.close_section().unwrap();
  let cooked = env.lookup_constant(&names[0]).unwrap();
  assert_eq!(cooked.ty, Expr::pi(x, Expr::type0(), Expr::type0()));
}

#[test]
fn revoked_certificates_do_not_validate() {
  let base = lib("Revoke").open_section();
  let cert = base.certificate();
  assert!(base.check_signatures(&[&cert]).is_some());
  let closed = base.close_section().unwrap();
  assert!(closed.check_signatures(&[&cert]).is_none());
}

// ============================================================================
// Opaque proofs
// ============================================================================

#[test]
fn opaque_proofs_can_use_side_effects() {
  let env = lib("OpEff");
  let (kn, h, env) =
    env.declare_opaque(l("thm"), Expr::type0(), None, UniverseEntry::default()).unwrap();
  let (lemma, _) = env.side_effect(l("lemma"), ConstantEntry::definition(Expr::prop())).unwrap();
  let proof = cnst(lemma.name());
  let cert = env.check_opaque(h, &proof, &[lemma]).unwrap();
  let env = env.fill(&cert).unwrap();
  let expected = Expr::let_in(id("lemma"), Expr::type0(), Expr::prop(), Expr::bvar(0));
  assert_eq!(env.opaque_body(&kn), Some(&expected));
  assert!(!env.has_label(&l("lemma")));
}

#[test]
fn opaque_declared_in_a_section_is_filled_after_close() {
  let a = id("A");
  let env = lib("OpSec").open_section().push_named_assum(a.clone(), Expr::type0()).unwrap();
  let ty = Expr::arrow(Expr::var(a.clone()), Expr::var(a.clone()));
  let (kn, h, env) =
    env.declare_opaque(l("idA"), ty.clone(), None, UniverseEntry::default()).unwrap();
  let env = env.close_section().unwrap();

  let binders = [(a.clone(), Expr::type0())];
  assert_eq!(env.lookup_constant(&kn).unwrap().ty, Expr::pis(&binders, ty));
  assert_eq!(env.export().unwrap_err(), KernelError::PendingObligations(1));

  let proof = Expr::lam(id("x"), Expr::var(a.clone()), Expr::bvar(0));
  let cert = env.check_opaque(h, &proof, &[]).unwrap();
  let env = env.fill(&cert).unwrap();
  assert!(env.is_fully_checked());
  assert_eq!(env.opaque_body(&kn), Some(&Expr::lams(&binders, proof)));
}

#[test]
fn certificates_are_bound_to_their_obligation() {
  let env = lib("Nonce");
  let (_, h, env) =
    env.declare_opaque(l("p"), Expr::type0(), None, UniverseEntry::default()).unwrap();
  let cert = env.check_opaque(h, &Expr::prop(), &[]).unwrap();
  let filled = env.fill(&cert).unwrap();
  assert_eq!(filled.fill(&cert).unwrap_err(), KernelError::Anomaly(Anomaly::AlreadyFilled(h)));
  // The unfilled version still accepts the certificate once.
  assert!(env.fill(&cert).is_ok());
}

// ============================================================================
// Modules
// ============================================================================

/// A signature `S` with a type `t`, a module `M` implementing it and a
/// functor `F (X : S)` defining `u := X.t`.
fn module_fixture() -> (ModPath, ModPath, ModPath, Environment) {
  let env = lib("Mods");
  let (s, env) = env.start_modtype(l("S")).unwrap();
  let (_, env) = param(&env, "t", Expr::type0());
  let (_, env) = env.end_modtype().unwrap();

  let (m, env) = env.start_module(l("M")).unwrap();
  let (_, env) = def(&env, "t", Expr::prop());
  let (_, env) = env.end_module().unwrap();

  let (f, env) = env.start_module(l("F")).unwrap();
  let (x, env) = env.add_module_parameter(l("X"), &s).unwrap();
  let xt = KerName::new(ModPath::bound(x), l("t"));
  let (_, env) = def(&env, "u", cnst(&xt));
  let (_, env) = env.end_module().unwrap();
  (s, m, f, env)
}

#[test]
fn modules_expose_their_fields() {
  let (_, m, f, env) = module_fixture();
  let mt = KerName::new(m.clone(), l("t"));
  assert_eq!(env.lookup_constant(&mt).unwrap().body(), Some(&Expr::prop()));
  assert!(env.lookup_module(&m).is_some());
  assert!(env.lookup_module(&f).unwrap().is_functor());
  assert_eq!(env.scope(), Scope::TopLevel);
}

#[test]
fn functor_application_substitutes_the_argument() {
  let (_, m, f, env) = module_fixture();
  let (n, env) = env.add_module(l("N"), &ModuleExpr::Path(f).apply(m.clone())).unwrap();
  let nu = env.lookup_constant(&KerName::new(n, l("u"))).unwrap();
  assert_eq!(nu.body(), Some(&cnst(&KerName::new(m, l("t")))));
}

#[test]
fn functor_arguments_must_match_the_signature() {
  let (_, _, f, env) = module_fixture();
  let (empty, env) = env.start_module(l("E")).unwrap();
  let (_, env) = env.end_module().unwrap();
  let err = env.add_module(l("N"), &ModuleExpr::Path(f.clone()).apply(empty)).unwrap_err();
  assert!(matches!(err, KernelError::SignatureMismatch { .. }));
  let err = env.add_module(l("N"), &ModuleExpr::Path(f.clone()).apply(f)).unwrap_err();
  assert!(matches!(err, KernelError::NotAModule(_)));
}

#[test]
fn parameters_come_first() {
  let (s, _, _, env) = module_fixture();
  let (_, env) = env.start_module(l("G")).unwrap();
  let (_, env) = param(&env, "v", Expr::type0());
  let err = env.add_module_parameter(l("X"), &s).unwrap_err();
  assert_eq!(err, KernelError::ParameterAfterField(l("X")));
}

#[test]
fn aliases_resolve_to_their_target() {
  let (_, m, _, env) = module_fixture();
  let (alias, env) = env.add_module(l("A"), &ModuleExpr::Path(m.clone())).unwrap();
  assert_eq!(env.resolver().resolve_module(&alias), m);
  let at = KerName::new(alias, l("t"));
  assert_eq!(env.lookup_constant(&at).unwrap().body(), Some(&Expr::prop()));
}

#[test]
fn include_splices_fields() {
  let (s, m, _, env) = module_fixture();
  let (big, env) = env.start_module(l("Big")).unwrap();
  let env = env.add_include(&Include::Module(ModuleExpr::Path(m.clone()))).unwrap();
  let bt = KerName::new(big.clone(), l("t"));
  assert_eq!(env.lookup_constant(&bt).unwrap().body(), Some(&Expr::prop()));
  assert_eq!(env.resolver().resolve_kername(&KerName::new(m, l("t"))), bt);
  // `t` is taken now.
  let err = env.add_include(&Include::ModType(s)).unwrap_err();
  assert_eq!(err, KernelError::DuplicateLabel(l("t")));
  let (_, env) = env.end_module().unwrap();
  assert!(env.lookup_constant(&bt).is_some());
}

#[test]
fn included_functors_take_the_current_module_as_argument() {
  let (_, _, f, env) = module_fixture();
  let include_f = Include::Module(ModuleExpr::Path(f));
  let (big, env) = env.start_module(l("Big")).unwrap();
  let (bt, env) = def(&env, "t", Expr::prop());
  let env = env.add_include(&include_f).unwrap();
  let bu = KerName::new(big, l("u"));
  assert_eq!(env.lookup_constant(&bu).unwrap().body(), Some(&cnst(&bt)));
  let (_, env) = env.end_module().unwrap();
  assert!(env.lookup_constant(&bu).is_some());

  // The structure built so far must satisfy the parameter's signature.
  let (_, empty) = env.start_module(l("Empty")).unwrap();
  let err = empty.add_include(&include_f).unwrap_err();
  assert!(matches!(err, KernelError::SignatureMismatch { .. }));
  let (_, wrong) = env.start_module(l("Wrong")).unwrap();
  let (_, wrong) = def(&wrong, "t", Expr::type0());
  let err = wrong.add_include(&include_f).unwrap_err();
  assert!(matches!(err, KernelError::SignatureMismatch { .. }));
  assert!(!wrong.has_label(&l("u")));
}

#[test]
fn modules_cannot_open_in_sections() {
  let env = lib("ModSec").open_section();
  assert_eq!(env.start_module(l("M")).unwrap_err(), KernelError::ModuleInSection);
  let (_, env) = lib("ModSec").start_module(l("M")).unwrap();
  assert_eq!(env.end_modtype().unwrap_err(), KernelError::NoOpenModule("module type"));
  let env = env.open_section();
  assert_eq!(env.end_module().unwrap_err(), KernelError::ScopeNesting("section"));
}

// ============================================================================
// Rewrite rules
// ============================================================================

fn with_symbol() -> (KerName, Environment) {
  let env = lib("Rules").with_flags(TypingFlags::default().with_rewrite_rules());
  let ty = Expr::arrow(Expr::type0(), Expr::type0());
  env.add_constant(l("f"), ConstantEntry::symbol(ty)).unwrap()
}

#[test]
fn rules_drive_reduction() {
  let (f, env) = with_symbol();
  let x = id("x");
  let rule = RewriteRule {
    pattern_vars: vec![(x.clone(), Expr::type0())],
    lhs: Expr::app(cnst(&f), Expr::var(x.clone())),
    rhs: Expr::var(x),
  };
  let env = env.add_rewrite_rules(l("f_id"), vec![rule]).unwrap();
  assert_eq!(env.rules_for(&f).len(), 1);
  let mut tc = TypeChecker::new(&env, NamedContext::new());
  assert_eq!(tc.whnf(&Expr::app(cnst(&f), Expr::prop())), Expr::prop());
}

#[test]
fn rules_must_be_linear_and_headed_by_symbols() {
  let (f, env) = with_symbol();
  let (g, env) = param(&env, "g", Expr::arrow(Expr::type0(), Expr::type0()));
  let x = id("x");
  let pattern_vars = vec![(x.clone(), Expr::type0())];
  let not_symbol = RewriteRule {
    pattern_vars: pattern_vars.clone(),
    lhs: Expr::app(cnst(&g), Expr::var(x.clone())),
    rhs: Expr::var(x.clone()),
  };
  let err = env.add_rewrite_rules(l("r1"), vec![not_symbol]).unwrap_err();
  assert!(matches!(err, KernelError::BadRewriteRule(_)));
  let unbound = RewriteRule {
    pattern_vars,
    lhs: Expr::app(cnst(&f), Expr::var(x)),
    rhs: Expr::var(id("y")),
  };
  let err = env.add_rewrite_rules(l("r2"), vec![unbound]).unwrap_err();
  assert!(matches!(err, KernelError::BadRewriteRule(_)));
  let err = env.open_section().add_rewrite_rules(l("r3"), vec![]).unwrap_err();
  assert_eq!(err, KernelError::RulesInSection);
}

// ============================================================================
// Libraries
// ============================================================================

fn base_library() -> (KerName, KerName, Environment) {
  let (nat, env) = add_nat(&lib("Base"));
  let env = env.add_universes(&ContextSet::of_univs([UnivVar::new("u")])).unwrap();
  let (one, env) = def(&env, "one", Expr::app(nat.succ, nat.zero));
  let (thm, h, env) =
    env.declare_opaque(l("thm"), Expr::type0(), None, UniverseEntry::default()).unwrap();
  let cert = env.check_opaque(h, &Expr::prop(), &[]).unwrap();
  let env = env.fill(&cert).unwrap();
  (one, thm, env)
}

#[test]
fn export_then_import_reproduces_the_library() {
  let (one, thm, base) = base_library();
  let compiled = base.export().unwrap();
  let bytes = compiled.to_bytes();
  let decoded = CompiledLibrary::from_bytes(&bytes).unwrap();
  assert_eq!(decoded.to_bytes(), bytes);
  let digest = Digest::of(&bytes);

  let user = lib("User").import(&decoded, digest).unwrap();
  assert_eq!(user.lookup_constant(&one), base.lookup_constant(&one));
  assert_eq!(user.opaque_body(&thm), Some(&Expr::prop()));
  let base_u = UnivVar::qualified(compiled.name.clone(), "u");
  assert!(user.universes().univs.contains(&base_u));
  assert!(!user.universes().univs.contains(&UnivVar::new("u")));
  assert_eq!(user.required(), vec![(compiled.name.clone(), digest)]);

  // Imported universes are not re-exported as the user's own.
  let exported = user.export().unwrap();
  assert!(exported.univs.is_empty());
  assert_eq!(exported.deps, vec![(compiled.name, digest)]);
}

/// A library with a polymorphic constant binding `u`, then global universes
/// `u` and `v` with `lo < hi` and a constant at `Sort(u)`.
fn ordered_universes(name: &str, lo: &str, hi: &str) -> CompiledLibrary {
  let (u, v) = (UnivVar::new("u"), UnivVar::new("v"));
  let poly = ConstantEntry::definition(Expr::sort(Level::var(u.clone())))
    .with_universes(UniverseEntry::Polymorphic(AbstractUniverses::new(vec![u.clone()])));
  let (_, env) = lib(name).add_constant(l("P"), poly).unwrap();
  let env = env.add_universes(&ContextSet::of_univs([u.clone(), v])).unwrap();
  let lt = Constraint::new(UnivVar::new(lo), ConstraintKind::Lt, UnivVar::new(hi));
  let env = env.add_constraints([&lt]).unwrap();
  let (_, env) = def(&env, "T", Expr::sort(Level::var(u)));
  env.export().unwrap()
}

#[test]
fn universes_of_different_libraries_never_collide() {
  let a = ordered_universes("A", "u", "v");
  let b = ordered_universes("B", "v", "u");
  let env = lib("Both").import(&a, a.digest()).unwrap();
  let env = env.import(&b, b.digest()).unwrap();
  let q = |lib: &CompiledLibrary, s: &str| UnivVar::qualified(lib.name.clone(), s);
  assert!(env.graph().check_lt(&q(&a, "u"), &q(&a, "v")));
  assert!(env.graph().check_lt(&q(&b, "v"), &q(&b, "u")));

  // Global universes in bodies follow the library; bound ones stay bound.
  let t = env.lookup_constant(&KerName::new(ModPath::file(a.name.clone()), l("T"))).unwrap();
  assert_eq!(t.body(), Some(&Expr::sort(Level::var(q(&a, "u")))));
  let p = env.lookup_constant(&KerName::new(ModPath::file(b.name.clone()), l("P"))).unwrap();
  assert_eq!(p.body(), Some(&Expr::sort(Level::var(UnivVar::new("u")))));

  // The loading library is free to declare its own `u`.
  let env = env.add_universes(&ContextSet::of_univs([UnivVar::new("u")])).unwrap();
  assert!(env.export().unwrap().univs.univs.contains(&UnivVar::new("u")));
}

#[test]
fn imports_check_dependencies_and_flags() {
  let (one, _, base) = base_library();
  let base_lib = base.export().unwrap();
  let base_digest = base_lib.digest();

  let user = lib("Mid").import(&base_lib, base_digest).unwrap();
  // Importing the same library again changes nothing.
  let again = user.import(&base_lib, base_digest).unwrap();
  assert_eq!(again.required().len(), 1);
  let (_, user) = def(&user, "two", cnst(&one));
  let mid = user.export().unwrap();
  let mid_digest = mid.digest();

  let err = lib("Top").import(&mid, mid_digest).unwrap_err();
  assert_eq!(err, KernelError::UnknownLibrary(base_lib.name.clone()));
  let top = lib("Top").import(&base_lib, base_digest).unwrap();
  assert!(top.import(&mid, mid_digest).is_ok());

  let strict = lib("Strict").with_flags(TypingFlags::default().with_rewrite_rules());
  let err = strict.import(&base_lib, base_digest).unwrap_err();
  assert_eq!(err, KernelError::FlagsMismatch(base_lib.name));
}

#[test]
fn conflicting_digests_are_rejected() {
  let (_, _, base) = base_library();
  let first = base.export().unwrap();
  let (_, changed) = param(&base, "extra", Expr::type0());
  let second = changed.export().unwrap();
  let env = lib("Conflict").import(&first, first.digest()).unwrap();
  let err = env.import(&second, second.digest()).unwrap_err();
  assert!(matches!(err, KernelError::DigestMismatch { .. }));
}

#[test]
fn imports_inside_a_section_are_replayed() {
  let (one, _, base) = base_library();
  let compiled = base.export().unwrap();
  let env = lib("Replay").open_section();
  let env = env.import(&compiled, compiled.digest()).unwrap();
  let env = env.close_section().unwrap();
  assert!(env.lookup_constant(&one).is_some());
  assert_eq!(env.required().len(), 1);
}

#[test]
fn imports_inside_a_module_reach_the_top_level() {
  let (one, _, base) = base_library();
  let compiled = base.export().unwrap();
  let (_, env) = lib("InMod").start_module(l("M")).unwrap();
  let env = env.import(&compiled, compiled.digest()).unwrap();
  let (_, env) = env.end_module().unwrap();
  assert!(env.lookup_constant(&one).is_some());
  let exported = env.export().unwrap();
  assert_eq!(exported.deps.len(), 1);
}
