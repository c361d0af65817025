// Backend-neutral capture interfaces

pub mod screen;
