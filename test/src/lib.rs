#[cfg(test)]
mod classify;
#[cfg(test)]
mod compose;

pub mod logger;
pub mod packet;
