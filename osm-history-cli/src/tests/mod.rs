//! Shared test harness modules for the OSM history CLI.

use super::*;

mod unit;
