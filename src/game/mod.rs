pub mod constants;
pub mod map;
pub mod mobj;
pub mod mobj_table;
pub mod player;
pub mod smoother;
pub mod sound;
pub mod spatial;
