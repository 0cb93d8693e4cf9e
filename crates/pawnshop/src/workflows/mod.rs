pub mod pledges;
