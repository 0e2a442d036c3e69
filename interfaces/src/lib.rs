pub mod de;
pub mod defs;
