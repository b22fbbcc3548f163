//! Binary encoding of compiled libraries.
//!
//! Integers are LEB128 varints, strings are length-prefixed UTF-8 and every
//! sum type starts with a one-byte tag. Opaque handles are process-local, so
//! they are written as indices in order of first occurrence; decoding mints
//! a fresh handle per index.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::arena::IdentityArena;
use crate::cons_list::ConsList;
use crate::declarations::{
  AbstractUniverses, ConstantBody, ConstantDef, Constructor, ModuleBody, ModuleKind, MutIndBody,
  OneInductiveBody, OpaqueHandle, RewriteRule, StructureBody, StructureField, Universes,
};
use crate::expr::{Expr, ExprData};
use crate::flags::TypingFlags;
use crate::names::{CtorRef, DirPath, Ident, IndRef, KerName, Label, MbId, ModPath, ModPathData};
use crate::resolver::{DeltaHint, DeltaResolver};
use crate::univ::level::LevelData;
use crate::univ::{
  Constraint, ConstraintKind, ContextSet, Level, QConstraint, QConstraintKind, QVar, Quality,
  UnivVar,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
  #[error("unexpected end of input reading {0}")]
  Eof(&'static str),
  #[error("bad magic number")]
  BadMagic,
  #[error("unsupported format version {0}")]
  Version(u8),
  #[error("invalid {what} tag {tag}")]
  BadTag { what: &'static str, tag: u8 },
  #[error("varint overflow")]
  Overflow,
  #[error("invalid utf-8 in a name")]
  Utf8,
  #[error("opaque index {0} out of order")]
  BadOpaque(u64),
  #[error("{0} trailing bytes")]
  Trailing(usize),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// A blake3 hash of an encoded library.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub blake3::Hash);

impl Digest {
  pub fn of(bytes: &[u8]) -> Self {
    Digest(blake3::hash(bytes))
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    self.0.as_bytes()
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.to_hex())
  }
}

impl fmt::Debug for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Digest({})", &self.0.to_hex()[..16])
  }
}

#[derive(Default)]
pub struct Encoder {
  buf: Vec<u8>,
  handles: FxHashMap<OpaqueHandle, u64>,
}

impl Encoder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn finish(self) -> Vec<u8> {
    self.buf
  }

  pub fn put_u8(&mut self, x: u8) {
    self.buf.push(x)
  }

  pub fn put_bytes(&mut self, bytes: &[u8]) {
    self.buf.extend_from_slice(bytes)
  }

  pub fn put_u64(&mut self, mut x: u64) {
    loop {
      let byte = (x & 0x7f) as u8;
      x >>= 7;
      if x == 0 {
        self.buf.push(byte);
        return;
      }
      self.buf.push(byte | 0x80);
    }
  }

  pub fn put_str(&mut self, s: &str) {
    self.put_u64(s.len() as u64);
    self.buf.extend_from_slice(s.as_bytes());
  }

  fn put_handle(&mut self, h: &OpaqueHandle) {
    let next = self.handles.len() as u64;
    let idx = *self.handles.entry(*h).or_insert(next);
    self.put_u64(idx);
  }
}

pub struct Decoder<'a> {
  buf: &'a [u8],
  arena: IdentityArena,
  handles: Vec<OpaqueHandle>,
}

impl<'a> Decoder<'a> {
  pub fn new(buf: &'a [u8]) -> Self {
    Decoder { buf, arena: IdentityArena::new(), handles: Vec::new() }
  }

  /// Fail unless every byte was consumed.
  pub fn finish(self) -> CodecResult<()> {
    match self.buf.len() {
      0 => Ok(()),
      n => Err(CodecError::Trailing(n)),
    }
  }

  pub fn get_u8(&mut self, what: &'static str) -> CodecResult<u8> {
    match self.buf.split_first() {
      Some((&x, rest)) => {
        self.buf = rest;
        Ok(x)
      },
      None => Err(CodecError::Eof(what)),
    }
  }

  pub fn get_bytes(&mut self, n: usize, what: &'static str) -> CodecResult<&'a [u8]> {
    match self.buf.split_at_checked(n) {
      Some((head, rest)) => {
        self.buf = rest;
        Ok(head)
      },
      None => Err(CodecError::Eof(what)),
    }
  }

  pub fn get_u64(&mut self, what: &'static str) -> CodecResult<u64> {
    let mut x: u64 = 0;
    let mut shift = 0;
    loop {
      let byte = self.get_u8(what)?;
      if shift >= 64 || (shift == 63 && byte > 1) {
        return Err(CodecError::Overflow);
      }
      x |= u64::from(byte & 0x7f) << shift;
      if byte & 0x80 == 0 {
        return Ok(x);
      }
      shift += 7;
    }
  }

  pub fn get_len(&mut self, what: &'static str) -> CodecResult<usize> {
    let n = self.get_u64(what)?;
    // Every element takes at least one byte.
    if n > self.buf.len() as u64 {
      return Err(CodecError::Eof(what));
    }
    Ok(n as usize)
  }

  pub fn get_str(&mut self, what: &'static str) -> CodecResult<&'a str> {
    let n = self.get_len(what)?;
    let bytes = self.get_bytes(n, what)?;
    std::str::from_utf8(bytes).map_err(|_| CodecError::Utf8)
  }

  fn get_handle(&mut self) -> CodecResult<OpaqueHandle> {
    let idx = self.get_u64("opaque handle")?;
    match idx.cmp(&(self.handles.len() as u64)) {
      std::cmp::Ordering::Less => Ok(self.handles[idx as usize]),
      std::cmp::Ordering::Equal => {
        let h = OpaqueHandle(self.arena.mint());
        self.handles.push(h);
        Ok(h)
      },
      std::cmp::Ordering::Greater => Err(CodecError::BadOpaque(idx)),
    }
  }
}

pub trait Serialize: Sized {
  fn put(&self, enc: &mut Encoder);
  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self>;
}

fn bad_tag<T>(what: &'static str, tag: u8) -> CodecResult<T> {
  Err(CodecError::BadTag { what, tag })
}

// ============================================================================
// Generic containers
// ============================================================================

impl Serialize for u64 {
  fn put(&self, enc: &mut Encoder) {
    enc.put_u64(*self)
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    dec.get_u64("integer")
  }
}

impl Serialize for bool {
  fn put(&self, enc: &mut Encoder) {
    enc.put_u8(*self as u8)
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("bool")? {
      0 => Ok(false),
      1 => Ok(true),
      x => bad_tag("bool", x),
    }
  }
}

impl<S: Serialize> Serialize for Vec<S> {
  fn put(&self, enc: &mut Encoder) {
    enc.put_u64(self.len() as u64);
    for x in self {
      x.put(enc);
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let n = dec.get_len("array")?;
    let mut v = Vec::with_capacity(n);
    for _ in 0..n {
      v.push(S::get(dec)?);
    }
    Ok(v)
  }
}

impl<S: Serialize> Serialize for Option<S> {
  fn put(&self, enc: &mut Encoder) {
    match self {
      None => enc.put_u8(0),
      Some(x) => {
        enc.put_u8(1);
        x.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("option")? {
      0 => Ok(None),
      1 => Ok(Some(S::get(dec)?)),
      x => bad_tag("option", x),
    }
  }
}

impl<X: Serialize, Y: Serialize> Serialize for (X, Y) {
  fn put(&self, enc: &mut Encoder) {
    self.0.put(enc);
    self.1.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let x = X::get(dec)?;
    let y = Y::get(dec)?;
    Ok((x, y))
  }
}

impl<S: Serialize> Serialize for Arc<S> {
  fn put(&self, enc: &mut Encoder) {
    self.as_ref().put(enc)
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(Arc::new(S::get(dec)?))
  }
}

fn put_set<'a, S: Serialize + 'a>(xs: impl ExactSizeIterator<Item = &'a S>, enc: &mut Encoder) {
  enc.put_u64(xs.len() as u64);
  for x in xs {
    x.put(enc);
  }
}

// ============================================================================
// Names
// ============================================================================

macro_rules! string_newtype {
  ($($t:ty => $what:literal),* $(,)?) => {
    $(
      impl Serialize for $t {
        fn put(&self, enc: &mut Encoder) {
          enc.put_str(self.as_str())
        }

        fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
          Ok(<$t>::new(dec.get_str($what)?))
        }
      }
    )*
  };
}

string_newtype!(Label => "label", Ident => "identifier");

macro_rules! qualified_var {
  ($($t:ty => $what:literal),* $(,)?) => {
    $(
      impl Serialize for $t {
        fn put(&self, enc: &mut Encoder) {
          self.library().cloned().put(enc);
          enc.put_str(self.as_str())
        }

        fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
          match Option::<DirPath>::get(dec)? {
            Some(lib) => Ok(<$t>::qualified(lib, dec.get_str($what)?)),
            None => Ok(<$t>::new(dec.get_str($what)?)),
          }
        }
      }
    )*
  };
}

qualified_var!(UnivVar => "universe", QVar => "quality");

impl Serialize for DirPath {
  fn put(&self, enc: &mut Encoder) {
    put_set(self.labels().iter(), enc)
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(DirPath::from_labels(Vec::get(dec)?))
  }
}

impl Serialize for MbId {
  fn put(&self, enc: &mut Encoder) {
    enc.put_u64(self.uid);
    self.label.put(enc);
    self.lib.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(MbId { uid: dec.get_u64("mbid")?, label: Label::get(dec)?, lib: DirPath::get(dec)? })
  }
}

impl Serialize for ModPath {
  fn put(&self, enc: &mut Encoder) {
    match self.as_data() {
      ModPathData::File(dp, _) => {
        enc.put_u8(0);
        dp.put(enc);
      },
      ModPathData::Bound(mbid, _) => {
        enc.put_u8(1);
        mbid.put(enc);
      },
      ModPathData::Dot(p, l, _) => {
        enc.put_u8(2);
        p.put(enc);
        l.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("module path")? {
      0 => Ok(ModPath::file(DirPath::get(dec)?)),
      1 => Ok(ModPath::bound(MbId::get(dec)?)),
      2 => {
        let p = ModPath::get(dec)?;
        Ok(p.dot(Label::get(dec)?))
      },
      x => bad_tag("module path", x),
    }
  }
}

impl Serialize for KerName {
  fn put(&self, enc: &mut Encoder) {
    self.path.put(enc);
    self.label.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let path = ModPath::get(dec)?;
    Ok(KerName::new(path, Label::get(dec)?))
  }
}

impl Serialize for IndRef {
  fn put(&self, enc: &mut Encoder) {
    self.mind.put(enc);
    enc.put_u64(self.idx as u64);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let mind = KerName::get(dec)?;
    Ok(IndRef { mind, idx: dec.get_u64("inductive index")? as usize })
  }
}

impl Serialize for CtorRef {
  fn put(&self, enc: &mut Encoder) {
    self.ind.put(enc);
    enc.put_u64(self.idx as u64);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let ind = IndRef::get(dec)?;
    Ok(CtorRef { ind, idx: dec.get_u64("constructor index")? as usize })
  }
}

// ============================================================================
// Universes
// ============================================================================

impl Serialize for Level {
  fn put(&self, enc: &mut Encoder) {
    match self.as_data() {
      LevelData::Zero => enc.put_u8(0),
      LevelData::Succ(l) => {
        enc.put_u8(1);
        l.put(enc);
      },
      LevelData::Max(a, b) => {
        enc.put_u8(2);
        a.put(enc);
        b.put(enc);
      },
      LevelData::IMax(a, b) => {
        enc.put_u8(3);
        a.put(enc);
        b.put(enc);
      },
      LevelData::Var(u) => {
        enc.put_u8(4);
        u.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("level")? {
      0 => Ok(Level::zero()),
      1 => Ok(Level::succ(Level::get(dec)?)),
      2 => {
        let a = Level::get(dec)?;
        Ok(Level::max(a, Level::get(dec)?))
      },
      3 => {
        let a = Level::get(dec)?;
        Ok(Level::imax(a, Level::get(dec)?))
      },
      4 => Ok(Level::var(UnivVar::get(dec)?)),
      x => bad_tag("level", x),
    }
  }
}

impl Serialize for Constraint {
  fn put(&self, enc: &mut Encoder) {
    self.lhs.put(enc);
    enc.put_u8(match self.kind {
      ConstraintKind::Lt => 0,
      ConstraintKind::Le => 1,
      ConstraintKind::Eq => 2,
    });
    self.rhs.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let lhs = UnivVar::get(dec)?;
    let kind = match dec.get_u8("constraint")? {
      0 => ConstraintKind::Lt,
      1 => ConstraintKind::Le,
      2 => ConstraintKind::Eq,
      x => return bad_tag("constraint", x),
    };
    Ok(Constraint::new(lhs, kind, UnivVar::get(dec)?))
  }
}

impl Serialize for Quality {
  fn put(&self, enc: &mut Encoder) {
    match self {
      Quality::Prop => enc.put_u8(0),
      Quality::SProp => enc.put_u8(1),
      Quality::Type => enc.put_u8(2),
      Quality::Var(q) => {
        enc.put_u8(3);
        q.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("quality")? {
      0 => Ok(Quality::Prop),
      1 => Ok(Quality::SProp),
      2 => Ok(Quality::Type),
      3 => Ok(Quality::Var(QVar::get(dec)?)),
      x => bad_tag("quality", x),
    }
  }
}

impl Serialize for QConstraint {
  fn put(&self, enc: &mut Encoder) {
    self.lhs.put(enc);
    enc.put_u8(match self.kind {
      QConstraintKind::Eq => 0,
      QConstraintKind::ElimTo => 1,
    });
    self.rhs.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let lhs = Quality::get(dec)?;
    let kind = match dec.get_u8("quality constraint")? {
      0 => QConstraintKind::Eq,
      1 => QConstraintKind::ElimTo,
      x => return bad_tag("quality constraint", x),
    };
    Ok(QConstraint { lhs, kind, rhs: Quality::get(dec)? })
  }
}

impl Serialize for ContextSet {
  fn put(&self, enc: &mut Encoder) {
    put_set(self.univs.iter(), enc);
    put_set(self.qualities.iter(), enc);
    put_set(self.constraints.iter(), enc);
    put_set(self.qconstraints.iter(), enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(ContextSet {
      univs: Vec::<UnivVar>::get(dec)?.into_iter().collect(),
      qualities: Vec::<QVar>::get(dec)?.into_iter().collect(),
      constraints: Vec::<Constraint>::get(dec)?.into_iter().collect(),
      qconstraints: Vec::<QConstraint>::get(dec)?.into_iter().collect(),
    })
  }
}

impl Serialize for AbstractUniverses {
  fn put(&self, enc: &mut Encoder) {
    self.params.put(enc);
    put_set(self.constraints.iter(), enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let params = Vec::get(dec)?;
    let constraints = Vec::<Constraint>::get(dec)?.into_iter().collect();
    Ok(AbstractUniverses { params, constraints })
  }
}

impl Serialize for Universes {
  fn put(&self, enc: &mut Encoder) {
    match self {
      Universes::Monomorphic => enc.put_u8(0),
      Universes::Polymorphic(abs) => {
        enc.put_u8(1);
        abs.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("universes")? {
      0 => Ok(Universes::Monomorphic),
      1 => Ok(Universes::Polymorphic(AbstractUniverses::get(dec)?)),
      x => bad_tag("universes", x),
    }
  }
}

// ============================================================================
// Terms
// ============================================================================

impl Serialize for Expr {
  fn put(&self, enc: &mut Encoder) {
    match self.as_data() {
      ExprData::Bvar(i) => {
        enc.put_u8(0);
        enc.put_u64(u64::from(*i));
      },
      ExprData::Var(x) => {
        enc.put_u8(1);
        x.put(enc);
      },
      ExprData::Sort(l) => {
        enc.put_u8(2);
        l.put(enc);
      },
      ExprData::Const(kn, us) => {
        enc.put_u8(3);
        kn.put(enc);
        us.put(enc);
      },
      ExprData::Ind(i, us) => {
        enc.put_u8(4);
        i.put(enc);
        us.put(enc);
      },
      ExprData::Construct(c, us) => {
        enc.put_u8(5);
        c.put(enc);
        us.put(enc);
      },
      ExprData::App(f, a) => {
        enc.put_u8(6);
        f.put(enc);
        a.put(enc);
      },
      ExprData::Lam(x, t, b) => {
        enc.put_u8(7);
        x.put(enc);
        t.put(enc);
        b.put(enc);
      },
      ExprData::Pi(x, t, b) => {
        enc.put_u8(8);
        x.put(enc);
        t.put(enc);
        b.put(enc);
      },
      ExprData::Let(x, t, v, b) => {
        enc.put_u8(9);
        x.put(enc);
        t.put(enc);
        v.put(enc);
        b.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("term")? {
      0 => {
        let i = dec.get_u64("de Bruijn index")?;
        Ok(Expr::bvar(u32::try_from(i).map_err(|_| CodecError::Overflow)?))
      },
      1 => Ok(Expr::var(Ident::get(dec)?)),
      2 => Ok(Expr::sort(Level::get(dec)?)),
      3 => {
        let kn = KerName::get(dec)?;
        Ok(Expr::cnst(kn, Vec::get(dec)?))
      },
      4 => {
        let i = IndRef::get(dec)?;
        Ok(Expr::ind(i, Vec::get(dec)?))
      },
      5 => {
        let c = CtorRef::get(dec)?;
        Ok(Expr::construct(c, Vec::get(dec)?))
      },
      6 => {
        let f = Expr::get(dec)?;
        Ok(Expr::app(f, Expr::get(dec)?))
      },
      tag @ (7 | 8) => {
        let x = Ident::get(dec)?;
        let t = Expr::get(dec)?;
        let b = Expr::get(dec)?;
        Ok(if tag == 7 { Expr::lam(x, t, b) } else { Expr::pi(x, t, b) })
      },
      9 => {
        let x = Ident::get(dec)?;
        let t = Expr::get(dec)?;
        let v = Expr::get(dec)?;
        Ok(Expr::let_in(x, t, v, Expr::get(dec)?))
      },
      x => bad_tag("term", x),
    }
  }
}

// ============================================================================
// Declarations
// ============================================================================

impl Serialize for ConstantDef {
  fn put(&self, enc: &mut Encoder) {
    match self {
      ConstantDef::Undef => enc.put_u8(0),
      ConstantDef::Def(e) => {
        enc.put_u8(1);
        e.put(enc);
      },
      ConstantDef::Opaque(h) => {
        enc.put_u8(2);
        enc.put_handle(h);
      },
      ConstantDef::Symbol => enc.put_u8(3),
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("constant definition")? {
      0 => Ok(ConstantDef::Undef),
      1 => Ok(ConstantDef::Def(Expr::get(dec)?)),
      2 => Ok(ConstantDef::Opaque(dec.get_handle()?)),
      3 => Ok(ConstantDef::Symbol),
      x => bad_tag("constant definition", x),
    }
  }
}

impl Serialize for OpaqueHandle {
  fn put(&self, enc: &mut Encoder) {
    enc.put_handle(self)
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    dec.get_handle()
  }
}

impl Serialize for ConstantBody {
  fn put(&self, enc: &mut Encoder) {
    self.name.put(enc);
    self.ty.put(enc);
    self.def.put(enc);
    self.universes.put(enc);
    self.inline.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(ConstantBody {
      name: KerName::get(dec)?,
      ty: Expr::get(dec)?,
      def: ConstantDef::get(dec)?,
      universes: Universes::get(dec)?,
      inline: bool::get(dec)?,
    })
  }
}

impl Serialize for Constructor {
  fn put(&self, enc: &mut Encoder) {
    self.label.put(enc);
    self.ty.put(enc);
    self.closed_ty.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(Constructor { label: Label::get(dec)?, ty: Expr::get(dec)?, closed_ty: Expr::get(dec)? })
  }
}

impl Serialize for OneInductiveBody {
  fn put(&self, enc: &mut Encoder) {
    self.label.put(enc);
    self.arity.put(enc);
    self.closed_arity.put(enc);
    self.sort.put(enc);
    self.ctors.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(OneInductiveBody {
      label: Label::get(dec)?,
      arity: Expr::get(dec)?,
      closed_arity: Expr::get(dec)?,
      sort: Level::get(dec)?,
      ctors: Vec::get(dec)?,
    })
  }
}

impl Serialize for MutIndBody {
  fn put(&self, enc: &mut Encoder) {
    self.name.put(enc);
    self.params.put(enc);
    self.packets.put(enc);
    self.universes.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(MutIndBody {
      name: KerName::get(dec)?,
      params: Vec::get(dec)?,
      packets: Vec::get(dec)?,
      universes: Universes::get(dec)?,
    })
  }
}

impl Serialize for RewriteRule {
  fn put(&self, enc: &mut Encoder) {
    self.pattern_vars.put(enc);
    self.lhs.put(enc);
    self.rhs.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    Ok(RewriteRule {
      pattern_vars: Vec::get(dec)?,
      lhs: Expr::get(dec)?,
      rhs: Expr::get(dec)?,
    })
  }
}

impl Serialize for StructureField {
  fn put(&self, enc: &mut Encoder) {
    match self {
      StructureField::Constant(c) => {
        enc.put_u8(0);
        c.put(enc);
      },
      StructureField::MutInd(m) => {
        enc.put_u8(1);
        m.put(enc);
      },
      StructureField::Module(m) => {
        enc.put_u8(2);
        m.put(enc);
      },
      StructureField::ModType(m) => {
        enc.put_u8(3);
        m.put(enc);
      },
      StructureField::Rules(rs) => {
        enc.put_u8(4);
        rs.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("structure field")? {
      0 => Ok(StructureField::Constant(ConstantBody::get(dec)?)),
      1 => Ok(StructureField::MutInd(MutIndBody::get(dec)?)),
      2 => Ok(StructureField::Module(Arc::get(dec)?)),
      3 => Ok(StructureField::ModType(Arc::get(dec)?)),
      4 => Ok(StructureField::Rules(Vec::get(dec)?)),
      x => bad_tag("structure field", x),
    }
  }
}

/// Structures are written oldest field first.
fn put_structure(s: &StructureBody, enc: &mut Encoder) {
  let mut fields: Vec<&(Label, StructureField)> = s.iter().collect();
  fields.reverse();
  enc.put_u64(fields.len() as u64);
  for (l, f) in fields {
    l.put(enc);
    f.put(enc);
  }
}

fn get_structure(dec: &mut Decoder<'_>) -> CodecResult<StructureBody> {
  let n = dec.get_len("structure")?;
  let mut s = ConsList::Nil;
  for _ in 0..n {
    let l = Label::get(dec)?;
    s = s.cons((l, StructureField::get(dec)?));
  }
  Ok(s)
}

impl Serialize for DeltaHint {
  fn put(&self, enc: &mut Encoder) {
    match self {
      DeltaHint::Equiv(kn) => {
        enc.put_u8(0);
        kn.put(enc);
      },
      DeltaHint::Inline(e) => {
        enc.put_u8(1);
        e.put(enc);
      },
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    match dec.get_u8("delta hint")? {
      0 => Ok(DeltaHint::Equiv(KerName::get(dec)?)),
      1 => Ok(DeltaHint::Inline(Expr::get(dec)?)),
      x => bad_tag("delta hint", x),
    }
  }
}

impl Serialize for DeltaResolver {
  fn put(&self, enc: &mut Encoder) {
    let aliases = self.module_aliases();
    enc.put_u64(aliases.len() as u64);
    for (from, to) in aliases {
      from.put(enc);
      to.put(enc);
    }
    let hints = self.hints();
    enc.put_u64(hints.len() as u64);
    for (kn, h) in hints {
      kn.put(enc);
      h.put(enc);
    }
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let mut r = DeltaResolver::new();
    for (from, to) in Vec::<(ModPath, ModPath)>::get(dec)? {
      r = r.add_module_alias(from, to);
    }
    for (kn, h) in Vec::<(KerName, DeltaHint)>::get(dec)? {
      r = r.add_hint(kn, h);
    }
    Ok(r)
  }
}

impl Serialize for ModuleBody {
  fn put(&self, enc: &mut Encoder) {
    self.path.put(enc);
    self.params.put(enc);
    enc.put_u8(match self.kind {
      ModuleKind::Module => 0,
      ModuleKind::ModType => 1,
    });
    put_structure(&self.structure, enc);
    self.delta.put(enc);
    self.alias.put(enc);
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let path = ModPath::get(dec)?;
    let params = Vec::get(dec)?;
    let kind = match dec.get_u8("module kind")? {
      0 => ModuleKind::Module,
      1 => ModuleKind::ModType,
      x => return bad_tag("module kind", x),
    };
    Ok(ModuleBody {
      path,
      params,
      kind,
      structure: get_structure(dec)?,
      delta: DeltaResolver::get(dec)?,
      alias: Option::get(dec)?,
    })
  }
}

impl Serialize for TypingFlags {
  fn put(&self, enc: &mut Encoder) {
    enc.put_u8(self.to_bits())
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let bits = dec.get_u8("typing flags")?;
    TypingFlags::from_bits(bits).ok_or(CodecError::BadTag { what: "typing flags", tag: bits })
  }
}

impl Serialize for Digest {
  fn put(&self, enc: &mut Encoder) {
    enc.put_bytes(self.as_bytes())
  }

  fn get(dec: &mut Decoder<'_>) -> CodecResult<Self> {
    let bytes = dec.get_bytes(32, "digest")?;
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    Ok(Digest(blake3::Hash::from_bytes(arr)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn roundtrip<S: Serialize + PartialEq + std::fmt::Debug>(x: &S) -> S {
    let mut enc = Encoder::new();
    x.put(&mut enc);
    let bytes = enc.finish();
    let mut dec = Decoder::new(&bytes);
    let y = S::get(&mut dec).unwrap();
    dec.finish().unwrap();
    y
  }

  #[quickcheck]
  fn varints(x: u64) -> bool {
    roundtrip(&x) == x
  }

  #[quickcheck]
  fn module_paths(mp: ModPath) -> bool {
    roundtrip(&mp) == mp
  }

  #[test]
  fn terms_keep_binders() {
    let x = Ident::new("x");
    let lam = Expr::lam(x.clone(), Expr::type0(), Expr::bvar(0));
    let pi = Expr::pi(x, Expr::type0(), Expr::bvar(0));
    assert_eq!(roundtrip(&lam), lam);
    assert_eq!(roundtrip(&pi), pi);
  }

  #[test]
  fn universes_keep_their_library() {
    let local = UnivVar::new("u");
    let global = local.qualify(&DirPath::new(&["Lib", "A"]));
    assert_eq!(roundtrip(&local), local);
    assert_eq!(roundtrip(&global), global);
    let q = QVar::qualified(DirPath::new(&["A"]), "q");
    assert_eq!(roundtrip(&q), q);
  }

  #[test]
  fn truncated_input_is_rejected() {
    let mut enc = Encoder::new();
    Expr::app(Expr::prop(), Expr::prop()).put(&mut enc);
    let bytes = enc.finish();
    let mut dec = Decoder::new(&bytes[..bytes.len() - 1]);
    assert!(matches!(Expr::get(&mut dec), Err(CodecError::Eof(_))));
  }

  #[test]
  fn unknown_tags_are_rejected() {
    let mut dec = Decoder::new(&[42]);
    assert_eq!(Expr::get(&mut dec), Err(CodecError::BadTag { what: "term", tag: 42 }));
  }

  #[test]
  fn handles_are_indexed_by_first_use() {
    let arena = IdentityArena::new();
    let (a, b) = (OpaqueHandle(arena.mint()), OpaqueHandle(arena.mint()));
    let mut enc = Encoder::new();
    vec![b, a, b].put(&mut enc);
    let bytes = enc.finish();
    assert_eq!(bytes, vec![3, 0, 1, 0]);
    let mut dec = Decoder::new(&bytes);
    let hs = Vec::<OpaqueHandle>::get(&mut dec).unwrap();
    assert_eq!(hs[0], hs[2]);
    assert_ne!(hs[0], hs[1]);
  }
}
