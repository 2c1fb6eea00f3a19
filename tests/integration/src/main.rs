mod helpers;

mod bootstrap;
mod changes;
mod observer;
mod recovery;
