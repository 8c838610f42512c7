pub mod excellon;
pub mod gerber;
