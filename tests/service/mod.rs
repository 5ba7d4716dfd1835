mod rows;
mod tables;
