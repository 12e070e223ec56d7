mod assets;
mod lifecycle;
mod output;
